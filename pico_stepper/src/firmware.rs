use core::fmt::Write as _;

use embedded_hal::delay::DelayNs;
use rig_protocol::{
    BOOT_BANNER, CodecError, EMERGENCY_STOP_LINE, MoveCommand, REJECTED_PREFIX, Rejection,
    is_stop,
};

use crate::{
    link::{DeviceLink, LINE_CAPACITY},
    motion::{Axes, MotionLoop, MotionOutcome},
    stepper::PulseDriver,
};

const NOTICE_CAPACITY: usize = REJECTED_PREFIX.len() + LINE_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Stopped,
    Rejected,
    Executed(MotionOutcome),
    /// Tail of the line whose first byte cancelled the previous move.
    Discarded,
}

/// The device command loop: reads one line at a time and runs at most one
/// move at a time.
pub struct Firmware<E, A, L, D> {
    axes: Axes<E, A>,
    link: L,
    delay: D,
    motion: MotionLoop,
    discard_next_line: bool,
}

impl<E, A, L, D> Firmware<E, A, L, D>
where
    E: PulseDriver,
    A: PulseDriver,
    L: DeviceLink,
    D: DelayNs,
{
    pub fn new(axes: Axes<E, A>, link: L, delay: D) -> Self {
        Self {
            axes,
            link,
            delay,
            motion: MotionLoop::new(),
            discard_next_line: false,
        }
    }

    pub fn axes(&self) -> &Axes<E, A> {
        &self.axes
    }

    pub fn into_parts(self) -> (Axes<E, A>, L) {
        (self.axes, self.link)
    }

    /// Announces the link and serves commands until the input closes.
    pub fn run(&mut self) {
        self.link.write_line(BOOT_BANNER);

        // One spare byte tells a full-length line from a cut one.
        let mut buf = [0u8; LINE_CAPACITY + 1];
        while let Some(len) = self.link.read_line(&mut buf) {
            self.handle_line(&buf[..len]);
        }
    }

    /// Acts on one inbound line, given without its terminator. Lines longer
    /// than [`LINE_CAPACITY`] can only stop the rig, never move it.
    pub fn handle_line(&mut self, line: &[u8]) -> LineOutcome {
        if core::mem::take(&mut self.discard_next_line) {
            log::debug!("dropping rest of cancelling line ({} bytes)", line.len());
            return LineOutcome::Discarded;
        }

        if is_stop(line) {
            self.link.write_line(EMERGENCY_STOP_LINE);
            return LineOutcome::Stopped;
        }

        if line.len() > LINE_CAPACITY {
            log::warn!("line longer than {LINE_CAPACITY} bytes");
            self.reject(&line[..LINE_CAPACITY]);
            return LineOutcome::Rejected;
        }

        let decoded = core::str::from_utf8(line)
            .map_err(|_| CodecError::Malformed)
            .and_then(MoveCommand::decode);
        let command = match decoded {
            Ok(command) => command,
            Err(e) => {
                log::warn!("{e}");
                self.reject(line);
                return LineOutcome::Rejected;
            }
        };

        let outcome = self
            .motion
            .execute(&command, &mut self.axes, &mut self.link, &mut self.delay);

        if let MotionOutcome::Cancelled { trigger, .. } = outcome {
            // The trigger byte began a line (normally the host's stop line)
            // whose remainder is still queued.
            self.discard_next_line = trigger != b'\n';
        }

        LineOutcome::Executed(outcome)
    }

    fn reject(&mut self, line: &[u8]) {
        let mut notice: heapless::String<NOTICE_CAPACITY> = heapless::String::new();
        // Each invalid byte shrinks to at most a `?`, so the echo fits.
        let _ = write!(notice, "{}", Rejection(line));
        self.link.write_line(&notice);
    }
}

#[cfg(test)]
mod tests {
    use rig_protocol::Positions;

    use super::*;
    use crate::{
        link::test_support::ScriptedLink, motion::test_support::test_axes,
        stepper::test_support::CountingDelay,
    };

    const MOVE_AZ_400: &str = r#"{"delay":225,"pulses":400,"dir":1,"report":100,"motor":1}"#;

    fn firmware(
        link: ScriptedLink,
    ) -> Firmware<
        crate::motion::test_support::TestStepper,
        crate::motion::test_support::TestStepper,
        ScriptedLink,
        CountingDelay,
    > {
        Firmware::new(test_axes(), link, CountingDelay::default())
    }

    #[test]
    fn announces_itself_and_runs_commands() {
        let mut firmware = firmware(ScriptedLink::with_lines(&[MOVE_AZ_400]));
        firmware.run();

        let (axes, link) = firmware.into_parts();
        assert_eq!(link.outbound[0], BOOT_BANNER);
        assert_eq!(link.outbound.len(), 1 + 5);
        assert_eq!(axes.positions(), Positions::new(400, 0));
    }

    #[test]
    fn stop_while_idle_only_emits_marker() {
        let mut firmware = firmware(ScriptedLink::default());

        assert_eq!(firmware.handle_line(b"[\"STOP\"]"), LineOutcome::Stopped);

        let (axes, link) = firmware.into_parts();
        assert_eq!(link.outbound, vec![EMERGENCY_STOP_LINE]);
        assert_eq!(axes.positions(), Positions::default());
    }

    #[test]
    fn stop_wins_inside_a_command_line() {
        let mut firmware = firmware(ScriptedLink::default());

        let line = r#"{"delay":225,"pulses":400,"dir":1,"report":100,"motor":1} STOP"#;
        assert_eq!(firmware.handle_line(line.as_bytes()), LineOutcome::Stopped);
        assert_eq!(firmware.axes().positions(), Positions::default());
    }

    #[test]
    fn malformed_command_is_echoed_without_motion() {
        let mut firmware = firmware(ScriptedLink::default());

        for line in [
            r#"{"delay":225,"pulses":400,"dir":1,"report":0,"motor":1}"#,
            r#"{"pulses":400,"delay":225,"dir":1,"report":100,"motor":1}"#,
            "move azimuth 10",
        ] {
            assert_eq!(firmware.handle_line(line.as_bytes()), LineOutcome::Rejected);
        }

        let (axes, link) = firmware.into_parts();
        assert_eq!(axes.positions(), Positions::default());
        assert!(link.outbound.iter().all(|line| line.starts_with("bad cmd: ")));
        assert!(!link.outbound.iter().any(|line| line.starts_with("STATUS")));
        assert_eq!(
            link.outbound[0],
            r#"bad cmd: {"delay":225,"pulses":400,"dir":1,"report":0,"motor":1}"#
        );
    }

    #[test]
    fn remainder_of_cancelling_stop_line_is_dropped() {
        // `[` of `["STOP"]` interrupts the move; the rest arrives as a line.
        let link = ScriptedLink::with_lines(&[MOVE_AZ_400, "\"STOP\"]", MOVE_AZ_400])
            .cancel_on(150, b'[');
        let mut firmware = firmware(link);
        firmware.run();

        let (axes, link) = firmware.into_parts();
        let stops = link
            .outbound
            .iter()
            .filter(|line| *line == EMERGENCY_STOP_LINE)
            .count();
        assert_eq!(stops, 1);
        assert_eq!(axes.positions(), Positions::new(150 + 400, 0));
    }

    #[test]
    fn newline_trigger_does_not_drop_next_command() {
        let link = ScriptedLink::with_lines(&[MOVE_AZ_400, MOVE_AZ_400]).cancel_on(10, b'\n');
        let mut firmware = firmware(link);
        firmware.run();

        assert_eq!(firmware.axes().positions(), Positions::new(410, 0));
    }

    #[test]
    fn overlong_line_is_refused_even_if_it_starts_with_a_command() {
        let padded = format!("{MOVE_AZ_400}{}x", " ".repeat(200));
        let link = ScriptedLink::with_lines(&[padded.as_str(), MOVE_AZ_400]);
        let mut firmware = firmware(link);
        firmware.run();

        let (axes, link) = firmware.into_parts();
        assert_eq!(axes.positions(), Positions::new(400, 0));
        let notices: Vec<&String> = link
            .outbound
            .iter()
            .filter(|line| line.starts_with("bad cmd: "))
            .collect();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].starts_with(&format!("bad cmd: {MOVE_AZ_400}")));
    }

    #[test]
    fn non_text_line_is_echoed_with_placeholders() {
        let mut firmware = firmware(ScriptedLink::default());

        assert_eq!(firmware.handle_line(b"\xff\xfemove\r"), LineOutcome::Rejected);
        assert_eq!(firmware.handle_line(b"\xffSTOP"), LineOutcome::Stopped);

        let (_, link) = firmware.into_parts();
        assert_eq!(link.outbound, vec!["bad cmd: ??move", EMERGENCY_STOP_LINE]);
    }
}
