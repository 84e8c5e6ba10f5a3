use std::collections::HashMap;
use std::fmt::{Display, Formatter, Write};
use std::time::{Duration, Instant};

use console::style;

use crate::blueprint::BuildGraph;
use crate::node::Handle;

#[derive(Debug, Clone)]
pub struct NodeExecution {
    pub label: String,
    pub start: Instant,
    pub duration: Duration,
}

/// Run diagnostics and performance metrics.
///
/// Returned by [`Runner::run_into`](crate::Runner::run_into) and
/// [`Runner::replay`](crate::Runner::replay). Only nodes whose recipe was
/// actually invoked are recorded, so a dry run yields empty diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// A map of node handles to their execution metrics.
    pub execution_times: HashMap<Handle, NodeExecution>,
}

impl Diagnostics {
    pub(crate) fn record(&mut self, handle: Handle, label: &str, start: Instant, duration: Duration) {
        self.execution_times.insert(
            handle,
            NodeExecution {
                label: label.to_string(),
                start,
                duration,
            },
        );
    }

    /// Sum of all recorded durations.
    pub fn total(&self) -> Duration {
        self.execution_times.values().map(|e| e.duration).sum()
    }

    /// Renders the build graph as a Mermaid diagram, color-coded by execution
    /// duration.
    ///
    /// * **Green**: Fast
    /// * **Yellow**: Moderate
    /// * **Red**: Slow
    /// * **Blue**: Not executed
    pub fn render_mermaid(&self, graph: &BuildGraph) -> String {
        let mut f = String::new();
        // Writing into a String can't fail.
        let _ = self.write_mermaid(&mut f, graph);
        f
    }

    fn write_mermaid(&self, f: &mut String, graph: &BuildGraph) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let times = &self.execution_times;
        let min_time = times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .fold(f64::MAX, f64::min);
        let max_time = times
            .values()
            .map(|t| t.duration.as_secs_f64())
            .fold(f64::MIN, f64::max);

        // Avoid divide by zero if nothing ran or everything took the same time
        let (min_time, span) = if max_time - min_time > f64::EPSILON {
            (min_time, max_time - min_time)
        } else {
            (min_time.min(max_time), 1.0)
        };

        for handle in graph.handles() {
            let index = handle.index().index();
            let name = graph.node(handle).label().replace('"', "\\\"");

            match times.get(&handle) {
                Some(exec) => {
                    let t = ((exec.duration.as_secs_f64() - min_time) / span).clamp(0.0, 1.0);

                    // 0.0 (Green) -> 0.5 (Yellow) -> 1.0 (Red)
                    let (r, g) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255)
                    } else {
                        (255, (255.0 * (1.0 - t) * 2.0) as u8)
                    };

                    writeln!(f, "    {index}[\"{name}<br/>{:.2?}\"]", exec.duration)?;
                    writeln!(f, "    style {index} fill:#{r:02x}{g:02x}00,color:#000")?;
                }
                None => {
                    writeln!(f, "    {index}[\"{name}\"]")?;
                    writeln!(f, "    style {index} fill:#aaccff,color:#000")?;
                }
            }
        }

        for handle in graph.handles() {
            for requirement in graph.node(handle).requires() {
                writeln!(
                    f,
                    "    {} --> {}",
                    requirement.index().index(),
                    handle.index().index()
                )?;
            }
        }

        Ok(())
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut executions: Vec<_> = self.execution_times.values().collect();
        executions.sort_by_key(|e| e.start);

        for exec in executions {
            writeln!(
                f,
                "{} {}",
                style(&exec.label).bold(),
                style(format!("({:.2?})", exec.duration)).blue()
            )?;
        }

        write!(
            f,
            "Built {} node(s) in {}",
            self.execution_times.len(),
            style(format!("{:.2?}", self.total())).blue()
        )
    }
}
