//! Prometheus text exposition (format 0.0.4) for a [`MetricsSnapshot`].

use crate::model::MetricsSnapshot;
use std::fmt::Write;

/// Content type to serve the rendered text with.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const PREFIX: &str = "agentloom";

pub fn render(snapshot: &MetricsSnapshot) -> String {
    let mut out = Exposition::default();

    out.single("runs_started_total", "counter", "Runs started, fresh and resumed.", snapshot.runs_started);
    out.single("runs_resumed_total", "counter", "Runs started from a checkpoint.", snapshot.runs_resumed);
    out.labelled(
        "runs_finished_total",
        "counter",
        "Finished runs by outcome.",
        "outcome",
        snapshot.runs_finished.iter().map(|(k, v)| (k.as_str(), *v)),
    );
    out.single("run_steps_total", "counter", "Steps taken by finished runs.", snapshot.run_steps);

    out.labelled(
        "llm_calls_total",
        "counter",
        "Model gateway calls by model.",
        "model",
        snapshot.models.iter().map(|(k, v)| (k.as_str(), v.calls)),
    );
    out.labelled(
        "llm_call_failures_total",
        "counter",
        "Failed model gateway calls by model.",
        "model",
        snapshot.models.iter().map(|(k, v)| (k.as_str(), v.failures)),
    );
    out.header("llm_tokens_total", "counter", "Tokens reported by the gateway.");
    for (model, usage) in &snapshot.models {
        out.sample("llm_tokens_total", &[("model", model), ("kind", "prompt")], usage.prompt_tokens);
        out.sample(
            "llm_tokens_total",
            &[("model", model), ("kind", "completion")],
            usage.completion_tokens,
        );
    }

    out.single("tool_executions_total", "counter", "Code executions.", snapshot.tool_executions);
    out.single("tool_failures_total", "counter", "Code executions that failed.", snapshot.tool_failures);

    out.labelled(
        "checkpoints_created_total",
        "counter",
        "Checkpoints written by reason.",
        "reason",
        snapshot.checkpoints_created.iter().map(|(k, v)| (k.as_str(), *v)),
    );
    out.single(
        "checkpoints_superseded_total",
        "counter",
        "Checkpoints displaced by a newer one.",
        snapshot.checkpoints_superseded,
    );

    out.labelled(
        "subagent_transitions_total",
        "counter",
        "Subagent status changes by status entered.",
        "status",
        snapshot.subagent_transitions.iter().map(|(k, v)| (k.as_str(), *v)),
    );

    out.single("events_dropped_total", "counter", "Domain events missed by the collector.", snapshot.events_dropped);
    out.single(
        "uptime_seconds",
        "gauge",
        "Seconds since the metrics engine started.",
        snapshot.uptime_secs().max(0) as u64,
    );

    out.text
}

#[derive(Default)]
struct Exposition {
    text: String,
}

impl Exposition {
    fn header(&mut self, name: &str, kind: &str, help: &str) {
        // Writing into a String cannot fail
        let _ = writeln!(self.text, "# HELP {PREFIX}_{name} {help}");
        let _ = writeln!(self.text, "# TYPE {PREFIX}_{name} {kind}");
    }

    fn sample(&mut self, name: &str, labels: &[(&str, &str)], value: u64) {
        let _ = write!(self.text, "{PREFIX}_{name}");
        if !labels.is_empty() {
            self.text.push('{');
            for (i, (key, val)) in labels.iter().enumerate() {
                if i > 0 {
                    self.text.push(',');
                }
                let _ = write!(self.text, "{key}=\"{}\"", escape(val));
            }
            self.text.push('}');
        }
        let _ = writeln!(self.text, " {value}");
    }

    fn single(&mut self, name: &str, kind: &str, help: &str, value: u64) {
        self.header(name, kind, help);
        self.sample(name, &[], value);
    }

    fn labelled<'a>(
        &mut self,
        name: &str,
        kind: &str,
        help: &str,
        label: &str,
        values: impl Iterator<Item = (&'a str, u64)>,
    ) {
        self.header(name, kind, help);
        for (value_label, value) in values {
            self.sample(name, &[(label, value_label)], value);
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
