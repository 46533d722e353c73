//! Engine facade: the operations external callers use.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use survey_map::MappingRuleSet;
use survey_model::{
    AttributeConstraints, DataPipeline, DataType, MappingRule, NewErrorEntry, PipelineId,
    PipelineRun, PipelineValidationRule, RuleId, RunId, RunStatus, TaxonomyAttribute,
    TaxonomyCategory,
};
use survey_taxonomy::TaxonomyTree;
use survey_validate::{AttributeSchema, ValidationEngine};
use tracing::{info, warn};

use crate::{
    AttributeDefinition, BatchSource, CategoryDefinition, ConfigError, EngineConfig,
    EngineDocument, EngineError, ErrorSink, InMemoryErrorStore, MappedRecord, PipelineError,
    PipelineRunCoordinator, RunContext, RunStatusReport,
};

type Result<T> = std::result::Result<T, EngineError>;

/// Error sink `source` for rejected configuration.
const CONFIG_SOURCE: &str = "configuration";

pub struct Engine {
    config: EngineConfig,
    taxonomy: TaxonomyTree,
    rules: Arc<MappingRuleSet>,
    validation: Arc<ValidationEngine>,
    pipelines: BTreeMap<PipelineId, DataPipeline>,
    coordinator: PipelineRunCoordinator,
    sink: Arc<ErrorSink>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("categories", &self.taxonomy.category_count())
            .field("attributes", &self.taxonomy.attribute_count())
            .field("mapping_rules", &self.rules.len())
            .field("validation_rules", &self.validation.len())
            .field("pipelines", &self.pipelines.len())
            .finish()
    }
}

impl Engine {
    /// An empty engine with an in-memory error store.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let sink = Arc::new(ErrorSink::new(
            Box::new(InMemoryErrorStore::new()),
            config.retry.clone(),
        ));
        Self::with_sink(config, sink)
    }

    pub fn with_sink(config: EngineConfig, sink: Arc<ErrorSink>) -> Result<Self> {
        config.validate()?;
        let coordinator = PipelineRunCoordinator::new(&config, Arc::clone(&sink))?;
        Ok(Self {
            config,
            taxonomy: TaxonomyTree::new(),
            rules: Arc::new(MappingRuleSet::new()),
            validation: Arc::new(ValidationEngine::new()),
            pipelines: BTreeMap::new(),
            coordinator,
            sink,
        })
    }

    /// Builds an engine from a full configuration document.
    ///
    /// Stops at the first rejected item; the rejection is also written to
    /// the error sink.
    pub fn from_config(document: EngineDocument) -> Result<Self> {
        let mut engine = Self::new(document.engine)?;
        engine.apply(
            document.categories,
            document.attributes,
            document.pipelines,
            document.mapping_rules,
            document.validation_rules,
        )?;
        info!(
            categories = engine.taxonomy.category_count(),
            attributes = engine.taxonomy.attribute_count(),
            mapping_rules = engine.rules.len(),
            pipelines = engine.pipelines.len(),
            validation_rules = engine.validation.len(),
            "engine configured"
        );
        Ok(engine)
    }

    fn apply(
        &mut self,
        categories: Vec<CategoryDefinition>,
        attributes: Vec<AttributeDefinition>,
        pipelines: Vec<DataPipeline>,
        mapping_rules: Vec<MappingRule>,
        validation_rules: Vec<PipelineValidationRule>,
    ) -> Result<()> {
        for category in &categories {
            self.register_category(category.parent.as_deref(), &category.code, &category.name)?;
        }
        for attribute in attributes {
            self.register_attribute(
                &attribute.category,
                &attribute.code,
                attribute.data_type,
                attribute.constraints,
                attribute.is_required,
            )?;
        }
        for pipeline in pipelines {
            self.register_pipeline(pipeline)?;
        }
        for rule in mapping_rules {
            self.register_mapping_rule(rule)?;
        }
        for rule in validation_rules {
            let pipeline_id = rule.pipeline_id.clone();
            self.register_validation_rule(&pipeline_id, rule)?;
        }
        // Deactivate last so children and rules can still attach.
        for category in categories.iter().filter(|category| !category.is_active) {
            self.deactivate_category(&category.code)?;
        }
        Ok(())
    }

    /// Writes a rejected configuration change to the sink and passes the
    /// error on.
    fn reject<E: Into<EngineError>>(&self, source_id: &str, err: E) -> EngineError {
        let err = err.into();
        warn!(source_id, error_type = err.error_type(), error = %err, "configuration rejected");
        self.sink.record(
            NewErrorEntry::new(CONFIG_SOURCE, err.error_type(), err.to_string())
                .with_source_id(source_id),
        );
        err
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn taxonomy(&self) -> &TaxonomyTree {
        &self.taxonomy
    }

    pub fn mapping_rules(&self) -> &MappingRuleSet {
        &self.rules
    }

    pub fn validation_rules(&self) -> &ValidationEngine {
        &self.validation
    }

    pub fn pipeline(&self, id: &PipelineId) -> Option<&DataPipeline> {
        self.pipelines.get(id)
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &DataPipeline> {
        self.pipelines.values()
    }

    /// The error sink shared by configuration and runs.
    pub fn errors(&self) -> &ErrorSink {
        &self.sink
    }

    pub fn register_category(
        &mut self,
        parent_code: Option<&str>,
        code: &str,
        name: &str,
    ) -> Result<TaxonomyCategory> {
        self.taxonomy
            .add_category(parent_code, code, name)
            .map_err(|err| self.reject(code, err))
    }

    pub fn register_attribute(
        &mut self,
        category_code: &str,
        code: &str,
        data_type: DataType,
        constraints: AttributeConstraints,
        is_required: bool,
    ) -> Result<TaxonomyAttribute> {
        self.taxonomy
            .add_attribute(category_code, code, data_type, constraints, is_required)
            .map_err(|err| self.reject(&format!("{category_code}.{code}"), err))
    }

    pub fn deactivate_category(&mut self, code: &str) -> Result<TaxonomyCategory> {
        match self.taxonomy.deactivate(code) {
            Ok(category) => Ok(category.clone()),
            Err(err) => Err(self.reject(code, err)),
        }
    }

    pub fn register_mapping_rule(&mut self, rule: MappingRule) -> Result<()> {
        let rule_id = rule.id.clone();
        let result = Arc::make_mut(&mut self.rules).register_rule(rule, &self.taxonomy);
        result.map_err(|err| self.reject(rule_id.as_str(), err))
    }

    pub fn deactivate_mapping_rule(&mut self, id: &RuleId) -> Result<()> {
        let result = Arc::make_mut(&mut self.rules)
            .deactivate_rule(id)
            .map(|_| ());
        result.map_err(|err| self.reject(id.as_str(), err))
    }

    pub fn register_pipeline(&mut self, pipeline: DataPipeline) -> Result<()> {
        if self.pipelines.contains_key(&pipeline.id) {
            return Err(self.reject(
                pipeline.id.as_str(),
                PipelineError::DuplicatePipeline(pipeline.id.clone()),
            ));
        }
        if pipeline.configuration.chunk_size == Some(0) {
            return Err(self.reject(
                pipeline.id.as_str(),
                ConfigError::Invalid(format!(
                    "pipeline {} has chunk_size 0",
                    pipeline.id
                )),
            ));
        }
        info!(pipeline_id = %pipeline.id, name = %pipeline.name, "pipeline registered");
        self.pipelines.insert(pipeline.id.clone(), pipeline);
        Ok(())
    }

    pub fn register_validation_rule(
        &mut self,
        pipeline_id: &PipelineId,
        rule: PipelineValidationRule,
    ) -> Result<()> {
        let rule_id = rule.id.clone();
        if !self.pipelines.contains_key(pipeline_id) {
            return Err(self.reject(
                rule_id.as_str(),
                PipelineError::PipelineNotFound(pipeline_id.clone()),
            ));
        }
        let result =
            Arc::make_mut(&mut self.validation).register_rule(pipeline_id, rule, &self.taxonomy);
        result.map_err(|err| self.reject(rule_id.as_str(), err))
    }

    /// Starts a run over `batch`; the single-flight slot is held from here
    /// until the run is terminal.
    pub fn submit_run<S>(&self, pipeline_id: &PipelineId, batch: S) -> Result<RunId>
    where
        S: BatchSource + 'static,
    {
        let pipeline = self
            .pipelines
            .get(pipeline_id)
            .ok_or_else(|| PipelineError::PipelineNotFound(pipeline_id.clone()))?;
        let configuration = &pipeline.configuration;
        let context = RunContext {
            pipeline_id: pipeline_id.clone(),
            rules: Arc::clone(&self.rules),
            validation: Arc::clone(&self.validation),
            schema: Arc::new(AttributeSchema::from_taxonomy(&self.taxonomy)?),
            tally: self.validation.tally_for(pipeline_id),
            chunk_size: configuration
                .chunk_size
                .unwrap_or(self.config.default_chunk_size),
            timeout: configuration
                .timeout_ms
                .or(self.config.default_timeout_ms)
                .map(Duration::from_millis),
        };
        Ok(self.coordinator.submit(pipeline, context, Box::new(batch))?)
    }

    pub fn get_run_status(&self, run_id: RunId) -> Result<RunStatusReport> {
        Ok(self.coordinator.report(run_id)?)
    }

    pub fn run(&self, run_id: RunId) -> Result<PipelineRun> {
        Ok(self.coordinator.status(run_id)?)
    }

    pub fn wait_run(&self, run_id: RunId) -> Result<PipelineRun> {
        Ok(self.coordinator.wait(run_id)?)
    }

    pub fn cancel_run(&self, run_id: RunId) -> Result<RunStatus> {
        Ok(self.coordinator.cancel(run_id)?)
    }

    pub fn run_output(&self, run_id: RunId) -> Result<Arc<Vec<MappedRecord>>> {
        Ok(self.coordinator.output(run_id)?)
    }

    pub fn runs_for(&self, pipeline_id: &PipelineId) -> Vec<PipelineRun> {
        self.coordinator.runs_for(pipeline_id)
    }

    /// The run holding the pipeline's single-flight slot, if any.
    pub fn active_run(&self, pipeline_id: &PipelineId) -> Option<RunId> {
        self.coordinator.active_run(pipeline_id)
    }
}
