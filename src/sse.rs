//! Incremental Server-Sent Events assembler.
//!
//! Pure state machine over fed byte chunks — no I/O. The transport
//! (`transport.rs`) drives it by feeding each chunk read from the
//! underlying response body and draining fully-assembled events.

/// One assembled SSE event: its (optional) `event:` type and the joined
/// `data:` lines.
#[derive(Debug, Clone)]
pub struct RawSseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

/// Incremental SSE line/event assembler.
pub struct SseAssembler {
    buffer: String,
    pending_data: Vec<String>,
    current_event_type: Option<String>,
    ready: std::collections::VecDeque<RawSseEvent>,
}

impl SseAssembler {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            pending_data: Vec::new(),
            current_event_type: None,
            ready: std::collections::VecDeque::new(),
        }
    }

    /// Feed newly-received bytes from the network.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        self.drain_lines();
    }

    /// Pop the next fully-assembled event, if any.
    pub fn next_event(&mut self) -> Option<RawSseEvent> {
        self.ready.pop_front()
    }

    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);

            if line.is_empty() {
                self.dispatch();
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.current_event_type = Some(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.pending_data.push(rest.trim_start().to_string());
            }
            // id:, retry:, and comment lines (":") are ignored.
        }
    }

    fn dispatch(&mut self) {
        if self.pending_data.is_empty() {
            self.current_event_type = None;
            return;
        }
        let data = self.pending_data.join("\n");
        let event_type = self.current_event_type.take();
        self.pending_data.clear();
        self.ready.push_back(RawSseEvent { event_type, data });
    }
}

impl Default for SseAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_event_split_across_feeds() {
        let mut a = SseAssembler::new();
        a.feed(b"data: hel");
        assert!(a.next_event().is_none());
        a.feed(b"lo world\n\n");
        let ev = a.next_event().unwrap();
        assert_eq!(ev.data, "hello world");
        assert!(ev.event_type.is_none());
    }

    #[test]
    fn parses_control_event() {
        let mut a = SseAssembler::new();
        a.feed(b"event: control\ndata: {\"streamNextOffset\":\"123\",\"upToDate\":true}\n\n");
        let ev = a.next_event().unwrap();
        assert_eq!(ev.event_type.as_deref(), Some("control"));
        assert!(ev.data.contains("123"));
    }

    #[test]
    fn joins_multiple_data_lines_with_newline() {
        let mut a = SseAssembler::new();
        a.feed(b"data: line1\ndata: line2\n\n");
        let ev = a.next_event().unwrap();
        assert_eq!(ev.data, "line1\nline2");
    }

    #[test]
    fn ignores_comment_and_id_fields() {
        let mut a = SseAssembler::new();
        a.feed(b": heartbeat\nid: 42\ndata: x\n\n");
        let ev = a.next_event().unwrap();
        assert_eq!(ev.data, "x");
    }

    #[test]
    fn queues_multiple_events_from_one_feed() {
        let mut a = SseAssembler::new();
        a.feed(b"data: one\n\ndata: two\n\n");
        assert_eq!(a.next_event().unwrap().data, "one");
        assert_eq!(a.next_event().unwrap().data, "two");
        assert!(a.next_event().is_none());
    }

    #[test]
    fn empty_event_with_no_data_lines_is_dropped() {
        let mut a = SseAssembler::new();
        a.feed(b"event: control\n\n");
        assert!(a.next_event().is_none());
    }
}
