//! Tool dispatcher
//!
//! Routes a named tool call through validation, mapping, the runner and the
//! interpreter. Holds no per-invocation state, so any number of calls can be
//! in flight at once.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, info_span, Instrument};

use crate::advisory::AdvisorySink;
use crate::config::Config;
use crate::error::BridgeError;
use crate::interpret::{interpret, ToolPayload};
use crate::mapper::{Mapped, Mapper};
use crate::protocol::Tool;
use crate::request::AnalysisRequest;
use crate::runner::Runner;
use crate::schema::ToolSchema;

pub struct Dispatcher<R> {
    schema: ToolSchema,
    mapper: Mapper,
    runner: R,
    advisories: Arc<dyn AdvisorySink>,
}

impl<R: Runner> Dispatcher<R> {
    pub fn new(
        schema: ToolSchema,
        mapper: Mapper,
        runner: R,
        advisories: Arc<dyn AdvisorySink>,
    ) -> Self {
        Self {
            schema,
            mapper,
            runner,
            advisories,
        }
    }

    pub fn from_config(config: &Config, runner: R, advisories: Arc<dyn AdvisorySink>) -> Self {
        let schema = ToolSchema::analyze_repository(config.log_levels);
        let mapper = Mapper::from_config(config, &schema);
        Self::new(schema, mapper, runner, advisories)
    }

    /// Discovery: every tool this dispatcher serves
    pub fn list_tools(&self) -> Vec<Tool> {
        vec![self.schema.to_tool()]
    }

    /// Invoke a tool by name
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolPayload, BridgeError> {
        if name != self.schema.name {
            return Err(BridgeError::UnknownOperation(name.to_string()));
        }

        self.schema.validate(&arguments)?;
        let request = AnalysisRequest::from_arguments(arguments)?;

        let span = info_span!("analyze_repository", url = %request.repository_url);
        self.analyze(request).instrument(span).await
    }

    async fn analyze(&self, request: AnalysisRequest) -> Result<ToolPayload, BridgeError> {
        let Mapped { spec, advisories } = self.mapper.build(&request);
        for advisory in advisories {
            self.advisories.advise(advisory);
        }

        info!("Running reporter with args {:?}", spec.args);
        interpret(self.runner.run(spec).await)
    }
}
