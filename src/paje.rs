//! Paje trace serialization.
//!
//! Format reference: <https://paje.sourceforge.net/download/publication/lang-paje.pdf>.
//! Each TimeLine in the merged tree becomes one `thds` container, and each
//! event a push (start) or pop (stop) of the container's `thdstate`.

use crate::timeline::{EventKind, TimeLine};
use crate::timer::TimerInfo;
use std::io::{self, Write};

const EVENT_DEFINITIONS: &str = "\
%EventDef PajeDefineContainerType 0
%       Alias string
%       Type string
%       Name string
%EndEventDef
%EventDef PajeDefineStateType 2
%       Alias string
%       Type string
%       Name string
%EndEventDef
%EventDef PajeDefineEntityValue 5
%       Alias string
%       Type string
%       Name string
%       Color color
%EndEventDef
%EventDef PajeCreateContainer 6
%       Time date
%       Alias string
%       Type string
%       Container string
%       Name string
%EndEventDef
%EventDef PajeDestroyContainer 7
%       Time date
%       Type string
%       Name string
%EndEventDef
%EventDef PajePushState 12
%       Time date
%       Type string
%       Container string
%       Value string
%       Id string
%EndEventDef
%EventDef PajePopState 13
%       Time date
%       Type string
%       Container string
%EndEventDef
";

const HIERARCHY: &str = "\
0 main 0 \"Task Manager\"
0 thds main \"Thread\"
2 thdstate thds \"Task\"
6 0 a9 main 0 \"Paje\"
";

/// Conversion from raw counter values to trace milliseconds.
pub(crate) struct Clock {
    /// Counter value mapped to time zero.
    pub origin: u64,
    /// Milliseconds per counter tick.
    pub scale: f64,
    /// Trace end, used to destroy the thread containers.
    pub end_ms: f64,
}

impl Clock {
    fn millis(&self, when: u64) -> f64 {
        when.saturating_sub(self.origin) as f64 * self.scale
    }
}

/// Writes the whole trace of `root` and its merged children.
pub(crate) fn write_trace<W: Write>(
    out: &mut W,
    root: &TimeLine,
    timers: &[TimerInfo],
    clock: &Clock,
) -> io::Result<()> {
    out.write_all(EVENT_DEFINITIONS.as_bytes())?;
    out.write_all(HIERARCHY.as_bytes())?;

    for (id, timer) in timers.iter().enumerate() {
        let [r, g, b] = timer.color;
        writeln!(
            out,
            "5 timer{} thdstate \"{}\" \"{} {} {}\"",
            id,
            escape(&timer.name),
            r,
            g,
            b
        )?;
    }

    // Containers must precede their events, so events are rendered first and
    // counted in the same pass; a TimeLine merged meanwhile is either fully
    // in or fully out.
    let mut events_text = Vec::new();
    let mut threads = 0;
    root.visit(&mut |events| {
        let thread = threads;
        for e in events {
            let t = clock.millis(e.when);
            match e.kind {
                EventKind::Start => writeln!(
                    events_text,
                    "12 {t:.6} thdstate th{thread} timer{id} {id}",
                    id = e.timer_id
                )?,
                EventKind::Stop => writeln!(events_text, "13 {t:.6} thdstate th{thread}")?,
            }
        }
        threads += 1;
        Ok(())
    })?;

    for thread in 0..threads {
        writeln!(out, "6 0 th{thread} thds a9 \"Thread {thread}\"")?;
    }
    out.write_all(&events_text)?;

    for thread in 0..threads {
        writeln!(out, "7 {:.6} thds th{}", clock.end_ms, thread)?;
    }
    Ok(())
}

fn escape(name: &str) -> String {
    name.replace('"', "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Event;

    fn render(root: &TimeLine, timers: &[TimerInfo]) -> String {
        let clock = Clock {
            origin: root.start_counter(),
            scale: 1e-3,
            end_ms: 5.0,
        };
        let mut out = Vec::new();
        write_trace(&mut out, root, timers, &clock).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_trace_layout() {
        let mut root = TimeLine::detached();
        let origin = root.start_counter();
        root.add(Event {
            when: origin + 1000,
            timer_id: 1,
            kind: EventKind::Start,
        });
        root.add(Event {
            when: origin + 3000,
            timer_id: 1,
            kind: EventKind::Stop,
        });
        let mut child = TimeLine::detached();
        child.add(Event {
            when: origin + 2000,
            timer_id: 0,
            kind: EventKind::Start,
        });
        child.add(Event {
            when: origin + 2500,
            timer_id: 0,
            kind: EventKind::Stop,
        });
        root.add_timeline(child);

        let timers = vec![
            TimerInfo {
                name: "alpha".into(),
                color: [0.0, 1.0, 0.0],
            },
            TimerInfo {
                name: "say \"beta\"".into(),
                color: [1.0, 0.0, 0.5],
            },
        ];
        let text = render(&root, &timers);
        let lines: Vec<&str> = text.lines().filter(|l| !l.starts_with('%')).collect();

        assert_eq!(
            &lines[..4],
            &[
                "0 main 0 \"Task Manager\"",
                "0 thds main \"Thread\"",
                "2 thdstate thds \"Task\"",
                "6 0 a9 main 0 \"Paje\"",
            ]
        );
        assert_eq!(lines[4], "5 timer0 thdstate \"alpha\" \"0 1 0\"");
        assert_eq!(lines[5], "5 timer1 thdstate \"say 'beta'\" \"1 0 0.5\"");
        assert_eq!(lines[6], "6 0 th0 thds a9 \"Thread 0\"");
        assert_eq!(lines[7], "6 0 th1 thds a9 \"Thread 1\"");
        assert_eq!(lines[8], "12 1.000000 thdstate th0 timer1 1");
        assert_eq!(lines[9], "13 3.000000 thdstate th0");
        assert_eq!(lines[10], "12 2.000000 thdstate th1 timer0 0");
        assert_eq!(lines[11], "13 2.500000 thdstate th1");
        assert_eq!(lines[12], "7 5.000000 thds th0");
        assert_eq!(lines[13], "7 5.000000 thds th1");
        assert_eq!(lines.len(), 14);
    }

    /// Every thread referenced by a state change has a container.
    fn assert_containers_cover_events(text: &str) {
        let containers = text.lines().filter(|l| l.starts_with("6 0 th")).count();
        let destroyed = text.lines().filter(|l| l.starts_with("7 ")).count();
        assert_eq!(containers, destroyed);
        for line in text.lines().filter(|l| l.starts_with("12 ") || l.starts_with("13 ")) {
            let thread: usize = line.split_whitespace().nth(3).unwrap()[2..].parse().unwrap();
            assert!(thread < containers, "{line} has no container ({containers})");
        }
    }

    #[test]
    fn test_concurrent_merge_while_writing() {
        let root = TimeLine::detached();
        let origin = root.start_counter();
        let target = root.merge_target();

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..200u64 {
                    let mut child = TimeLine::detached();
                    child.add(Event {
                        when: origin + i,
                        timer_id: 0,
                        kind: EventKind::Start,
                    });
                    child.add(Event {
                        when: origin + i + 1,
                        timer_id: 0,
                        kind: EventKind::Stop,
                    });
                    target.merge(child);
                }
            });
            for _ in 0..50 {
                assert_containers_cover_events(&render(&root, &[]));
            }
        });

        let text = render(&root, &[]);
        assert_containers_cover_events(&text);
        assert_eq!(text.lines().filter(|l| l.starts_with("6 0 th")).count(), 201);
    }

    #[test]
    fn test_counter_before_origin_clamps_to_zero() {
        let clock = Clock {
            origin: 100,
            scale: 2.0,
            end_ms: 0.0,
        };
        assert_eq!(clock.millis(50), 0.0);
        assert_eq!(clock.millis(101), 2.0);
    }

    #[test]
    fn test_definitions_present() {
        let text = render(&TimeLine::detached(), &[]);
        assert!(text.contains("%EventDef PajePushState 12"));
        assert!(text.contains("%EventDef PajePopState 13"));
        assert!(text.contains("6 0 th0 thds a9 \"Thread 0\""));
    }
}
