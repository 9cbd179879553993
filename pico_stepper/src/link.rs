/// Longest inbound line the firmware acts on, terminator excluded.
pub const LINE_CAPACITY: usize = 128;

/// The device end of the serial link.
pub trait DeviceLink {
    /// Blocks until a full inbound line is available and copies it into
    /// `buf` without its terminator. Bytes past `buf.len()` are dropped up to
    /// the newline. Returns the copied length, or `None` once the input is
    /// closed.
    fn read_line(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Returns the next inbound byte only if one is already waiting.
    fn poll_byte(&mut self) -> Option<u8>;

    /// Writes one line and its terminator.
    fn write_line(&mut self, line: &str);
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;

    use super::DeviceLink;

    /// Replays inbound lines and hands out a cancel byte on a chosen poll.
    #[derive(Default)]
    pub struct ScriptedLink {
        pub inbound: VecDeque<Vec<u8>>,
        pub cancel_on_poll: Option<(u32, u8)>,
        /// A byte that is already waiting before the first poll.
        pub queued: Option<u8>,
        pub polls: u32,
        pub outbound: Vec<String>,
    }

    impl ScriptedLink {
        pub fn with_lines(lines: &[&str]) -> Self {
            Self {
                inbound: lines.iter().map(|line| line.as_bytes().to_vec()).collect(),
                ..Default::default()
            }
        }

        pub fn cancel_on(mut self, poll: u32, byte: u8) -> Self {
            self.cancel_on_poll = Some((poll, byte));
            self
        }

        pub fn with_queued(mut self, byte: u8) -> Self {
            self.queued = Some(byte);
            self
        }
    }

    impl DeviceLink for ScriptedLink {
        fn read_line(&mut self, buf: &mut [u8]) -> Option<usize> {
            let line = self.inbound.pop_front()?;
            let len = line.len().min(buf.len());
            buf[..len].copy_from_slice(&line[..len]);
            Some(len)
        }

        fn poll_byte(&mut self) -> Option<u8> {
            self.polls += 1;
            if let Some(byte) = self.queued.take() {
                return Some(byte);
            }
            match self.cancel_on_poll {
                Some((poll, byte)) if poll == self.polls => Some(byte),
                _ => None,
            }
        }

        fn write_line(&mut self, line: &str) {
            self.outbound.push(line.to_string());
        }
    }
}
