//! Show where a stage would run for a described payload.

use anyhow::Result;
use clap::Parser;
use log::info;

use proactor_lib::classifier::Route as StageRoute;
use proactor_lib::dispatcher::ProactorDispatcher;
use proactor_lib::event::Payload;
use proactor_lib::stage::{ProcessingType, Stage};
use proactor_pool::PoolRole;

use crate::commands::command::Command;
use crate::commands::common::DispatchOptions;

/// Print the routing decision for a processing type and payload.
#[derive(Debug, Parser)]
#[command(
    name = "route",
    about = "\x1b[38;5;30m[DISPATCH]\x1b[0m       \x1b[36mShow which pool a stage runs on for a payload\x1b[0m",
    long_about = r#"
Show which execution context a stage would run on.

Light stages run on the event loop, CPU-intensive stages on the CPU-intensive pool and
blocking stages on the blocking pool. IO stages run on the event loop unless the
payload is a stream longer than the streaming threshold (or of unknown length).

Example usage:
  proactor route --processing-type io-rw --stream --byte-length 32768
  proactor route --processing-type cpu-intensive --mode event-loop
"#
)]
pub struct Route {
    /// Processing type of the stage
    #[arg(short = 't', long = "processing-type", value_enum)]
    pub processing_type: ProcessingType,

    /// The payload is a stream
    #[arg(long = "stream", default_value_t = false)]
    pub stream: bool,

    /// Payload length in bytes; omit for unknown
    #[arg(long = "byte-length")]
    pub byte_length: Option<u64>,

    /// Dispatcher options
    #[command(flatten)]
    pub dispatch: DispatchOptions,
}

impl Route {
    /// Describe the decision as `"<context> (<route>)"`.
    pub fn decide(&self, dispatcher: &ProactorDispatcher) -> String {
        let payload = if self.stream {
            Payload::stream(Vec::new(), self.byte_length)
        } else {
            Payload::bytes(Vec::new())
        };
        let routed = dispatcher.on_stage(Stage::new("route", self.processing_type, Ok));
        let target = routed.target_for(&payload).unwrap_or(PoolRole::EventLoop);
        let context = dispatcher.pool_name(target);
        match routed.route() {
            route @ StageRoute::Gated => {
                let threshold = dispatcher.config().streaming_threshold_bytes;
                format!("{context} ({route}, threshold {threshold} bytes)")
            }
            route => format!("{context} ({route})"),
        }
    }
}

impl Command for Route {
    fn execute(&self, _command_line: &str) -> Result<()> {
        let dispatcher = ProactorDispatcher::new("route", self.dispatch.to_config())?;
        let length = self.byte_length.map_or_else(|| "unknown".to_string(), |n| format!("{n} bytes"));
        info!(
            "{} stage, {} payload of {}",
            self.processing_type,
            if self.stream { "streamed" } else { "materialized" },
            length
        );
        println!("{}", self.decide(&dispatcher));
        Ok(())
    }
}
