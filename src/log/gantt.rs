//! Gantt-style SVG chart of the event stream: one row per thread,
//! execution blocks at their simulated intervals, idle spans on the core
//! row.

use std::io::{self, Write};

use crate::log::{Event, EventKind, EventSink, ThreadRef};
use crate::time::Time;

const ROW_HEIGHT: f64 = 28.0;
const ROW_GAP: f64 = 8.0;
const LABEL_WIDTH: f64 = 140.0;
const UNIT_WIDTH: f64 = 24.0;
const MARGIN: f64 = 20.0;
const AXIS_STEP: i64 = 5;

const EXEC_FILL: &str = "#7a9ecc";
const IDLE_FILL: &str = "#cccccc";

struct Span {
    row: usize,
    start: Time,
    end: Time,
    idle: bool,
}

/// Collects execution intervals and renders them as SVG on `finish`.
#[derive(Default)]
pub struct GanttLog {
    rows: Vec<String>,
    spans: Vec<Span>,
    end_time: Time,
}

impl GanttLog {
    pub fn new() -> GanttLog {
        GanttLog::default()
    }

    fn row_for(&mut self, label: String) -> usize {
        match self.rows.iter().position(|r| *r == label) {
            Some(idx) => idx,
            None => {
                self.rows.push(label);
                self.rows.len() - 1
            }
        }
    }

    fn thread_row(&mut self, thread: &ThreadRef) -> usize {
        self.row_for(thread.to_string())
    }

    /// Render the chart. Positions are exact rationals scaled to pixels
    /// only at this point.
    pub fn write<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let units = self.end_time.format_decimal(6).parse::<f64>().unwrap_or(0.0);
        let width = LABEL_WIDTH + units * UNIT_WIDTH + 2.0 * MARGIN;
        let height = (self.rows.len() as f64) * (ROW_HEIGHT + ROW_GAP) + 3.0 * MARGIN;

        writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width:.0}" height="{height:.0}" font-family="monospace" font-size="12">"#
        )?;

        for (idx, label) in self.rows.iter().enumerate() {
            let y = MARGIN + (idx as f64) * (ROW_HEIGHT + ROW_GAP);
            writeln!(
                out,
                r#"  <text x="{MARGIN:.1}" y="{:.1}">{label}</text>"#,
                y + ROW_HEIGHT * 0.7
            )?;
        }

        for span in &self.spans {
            let x = LABEL_WIDTH + to_px(span.start);
            let w = to_px(span.end - span.start);
            let y = MARGIN + (span.row as f64) * (ROW_HEIGHT + ROW_GAP);
            let fill = if span.idle { IDLE_FILL } else { EXEC_FILL };
            writeln!(
                out,
                r#"  <rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{ROW_HEIGHT:.1}" fill="{fill}" stroke="black"/>"#
            )?;
        }

        // Time axis with ticks every few units.
        let axis_y = height - MARGIN;
        writeln!(
            out,
            r#"  <line x1="{LABEL_WIDTH:.1}" y1="{axis_y:.1}" x2="{:.1}" y2="{axis_y:.1}" stroke="black"/>"#,
            LABEL_WIDTH + units * UNIT_WIDTH
        )?;
        let mut tick = 0i64;
        while Time::from_units(tick) <= self.end_time {
            let x = LABEL_WIDTH + (tick as f64) * UNIT_WIDTH;
            writeln!(
                out,
                r#"  <line x1="{x:.1}" y1="{axis_y:.1}" x2="{x:.1}" y2="{:.1}" stroke="black"/>"#,
                axis_y + 5.0
            )?;
            writeln!(
                out,
                r#"  <text x="{x:.1}" y="{:.1}" text-anchor="middle">{tick}</text>"#,
                axis_y + 18.0
            )?;
            tick += AXIS_STEP;
        }

        writeln!(out, "</svg>")
    }
}

fn to_px(span: Time) -> f64 {
    span.format_decimal(6).parse::<f64>().unwrap_or(0.0) * UNIT_WIDTH
}

impl EventSink for GanttLog {
    fn emit(&mut self, event: &Event) -> io::Result<()> {
        match &event.kind {
            EventKind::ThreadExecute { thread, run_time } => {
                let row = self.thread_row(thread);
                self.spans.push(Span {
                    row,
                    start: event.time,
                    end: event.time + *run_time,
                    idle: false,
                });
                self.end_time = self.end_time.max(event.time + *run_time);
            }
            EventKind::CoreIdle { until } => {
                let row = self.row_for(format!("cpu {}", event.core.0));
                self.spans.push(Span {
                    row,
                    start: event.time,
                    end: *until,
                    idle: true,
                });
                self.end_time = self.end_time.max(*until);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoreUid;

    #[test]
    fn renders_rows_and_blocks() {
        let mut log = GanttLog::new();
        log.emit(&Event {
            core: CoreUid(0),
            time: Time::zero(),
            kind: EventKind::ThreadExecute {
                thread: ThreadRef {
                    module: "0".to_string(),
                    tid: 1,
                },
                run_time: Time::from_units(4),
            },
        })
        .unwrap();
        log.emit(&Event {
            core: CoreUid(0),
            time: Time::from_units(4),
            kind: EventKind::CoreIdle {
                until: Time::from_units(6),
            },
        })
        .unwrap();

        let mut buf = Vec::new();
        log.write(&mut buf).unwrap();
        let svg = String::from_utf8(buf).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("0-1"));
        assert!(svg.contains("cpu 0"));
        assert_eq!(svg.matches("<rect").count(), 2);
    }
}
