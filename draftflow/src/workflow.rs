//! The default content workflow run by the `draftflow` binary.
//!
//! ```text
//! ingest -> analyze_chunks -> synthesize -+-(skip_critique)-> plan
//!                                         +-> critique
//! critique -+-(skip_research)-> plan
//!           +-> enrich -> reading_material -> plan
//! plan -> write_scripts -+-(skip_translate)-> END
//!                        +-> translate -> END
//! ```
//!
//! `enrich` and `reading_material` build on the critique, so skipping the
//! critique skips them too.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::errors::PipelineValidationError;
use crate::extract::RequiredFields;
use crate::pipeline::{Edge, PipelineBuilder, StageGraph, StageSpec};
use crate::stages::{
    GenerationSettings, LoadChunksStage, MapGenerateStage, OutputMode, ReduceGenerateStage,
    ReduceInput,
};

/// Flag that routes `synthesize` straight to `plan`.
pub const SKIP_CRITIQUE: &str = "skip_critique";
/// Flag that routes `critique` straight to `plan`.
pub const SKIP_RESEARCH: &str = "skip_research";
/// Flag that ends the run after `write_scripts`.
pub const SKIP_TRANSLATE: &str = "skip_translate";
/// Config key of the model used for reading and planning.
pub const READER_MODEL: &str = "reader_model";
/// Config key of the model used for scripts.
pub const WRITER_MODEL: &str = "writer_model";
/// Config key of the model used for translation.
pub const TRANSLATOR_MODEL: &str = "translator_model";

/// Part headings such as `PART I` through `PART VI` start a new chunk.
pub const PART_HEADING_PATTERN: &str = r"^PART\s+(?:I{1,3}|IV|V|VI)\b";

/// Prompt templates, one per generative stage.
///
/// Placeholders are `{name}`; every scalar config value is available, plus
/// the stage's inputs and, for mapped stages, `{item}`, `{index}` and `{total}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowPrompts {
    /// Per-chunk analysis.
    pub analyze: String,
    /// Merge of all chunk analyses.
    pub synthesize: String,
    /// Critique of the merged concept graph.
    pub critique: String,
    /// Background briefing built from the graph and the critique.
    pub enrich: String,
    /// Companion study guide in Markdown.
    pub reading_material: String,
    /// Episode plan.
    pub plan: String,
    /// One script per planned episode.
    pub write_script: String,
    /// Translation of one script.
    pub translate: String,
}

impl Default for WorkflowPrompts {
    fn default() -> Self {
        Self {
            analyze: "Analyze part {index} of {total}. Reply with JSON holding concepts, \
                      aporias, relations and logic_flow.\n\n{item}"
                .to_string(),
            synthesize: "Merge these chunk analyses into one concept graph. Reply with JSON \
                         holding concepts, relations, aporias, logic_flow and core_frustration.\n\n\
                         {chunk_analyses}"
                .to_string(),
            critique: "Critique this concept graph. Reply with JSON holding critiques.\n\n{concept_graph}"
                .to_string(),
            enrich: "Write a background briefing for the scriptwriter. Reply with JSON holding \
                     enrichment_summary, enrichment_summary_ja and critique_perspectives_ja.\n\n\
                     Concept graph:\n{concept_graph}\n\nCritique:\n{critique_report}"
                .to_string(),
            reading_material: "Write a study guide in Markdown with an abstract, one section \
                               per part and a conclusion.\n\nBackground:\n{enrichment}\n\n\
                               Part analyses:\n{chunk_analyses}\n\nCritique:\n{critique_report}"
                .to_string(),
            plan: "Plan a series of episodes. Reply with JSON holding episodes.\n\n\
                   Concept graph:\n{concept_graph}\n\nCritique:\n{critique_report}\n\n\
                   Background:\n{enrichment}"
                .to_string(),
            write_script: "Write the dialogue for episode {index} of {total}. Reply with JSON \
                           holding dialogue.\n\n{item}"
                .to_string(),
            translate: "Translate this script into {target_language}.\n\n{item}".to_string(),
        }
    }
}

/// Builds the default workflow graph.
///
/// # Errors
///
/// Only fails if the wiring below is inconsistent.
pub fn build_default_pipeline(prompts: &WorkflowPrompts) -> Result<StageGraph, PipelineValidationError> {
    let ingest = LoadChunksStage::new("ingest", "raw_chunks").with_heading_pattern(PART_HEADING_PATTERN);

    let analyze = MapGenerateStage::new(
        "analyze_chunks",
        "raw_chunks",
        "chunk_analyses",
        GenerationSettings::new(
            &prompts.analyze,
            READER_MODEL,
            OutputMode::json(json!({
                "concepts": [],
                "aporias": [],
                "relations": [],
                "logic_flow": "",
            })),
        )
        .with_temperature(0.1)
        .with_context_window(16_384),
    )
    .with_item_chars(20_000);

    let synthesize = ReduceGenerateStage::new(
        "synthesize",
        vec![ReduceInput::new("chunk_analyses").truncated(25_000)],
        "concept_graph",
        GenerationSettings::new(
            &prompts.synthesize,
            READER_MODEL,
            OutputMode::json(json!({
                "concepts": [],
                "relations": [],
                "aporias": [],
                "logic_flow": "",
                "core_frustration": "",
            })),
        )
        .with_temperature(0.1)
        .with_context_window(32_768),
    );

    let critique = ReduceGenerateStage::new(
        "critique",
        vec![ReduceInput::new("concept_graph").truncated(12_000)],
        "critique_report",
        GenerationSettings::new(
            &prompts.critique,
            READER_MODEL,
            OutputMode::validated(
                Arc::new(RequiredFields::new(["critiques"])),
                json!({"critiques": []}),
            ),
        )
        .with_temperature(0.2)
        .with_context_window(32_768),
    );

    let enrich = ReduceGenerateStage::new(
        "enrich",
        vec![
            ReduceInput::new("concept_graph").truncated(10_000),
            ReduceInput::new("critique_report").truncated(10_000),
        ],
        "enrichment",
        GenerationSettings::new(
            &prompts.enrich,
            READER_MODEL,
            OutputMode::json(json!({
                "enrichment_summary": "",
                "enrichment_summary_ja": "",
                "critique_perspectives_ja": "",
            })),
        )
        .with_temperature(0.2)
        .with_context_window(32_768),
    );

    let reading_material = ReduceGenerateStage::new(
        "reading_material",
        vec![
            ReduceInput::new("enrichment"),
            ReduceInput::new("chunk_analyses").truncated(20_000),
            ReduceInput::new("critique_report").truncated(8_000),
        ],
        "reading_material",
        GenerationSettings::new(&prompts.reading_material, READER_MODEL, OutputMode::text(json!("")))
            .with_temperature(0.3)
            .with_context_window(32_768),
    );

    let plan = ReduceGenerateStage::new(
        "plan",
        vec![
            ReduceInput::new("concept_graph").truncated(10_000),
            ReduceInput::new("critique_report").optional(),
            ReduceInput::new("enrichment").optional(),
        ],
        "syllabus",
        GenerationSettings::new(
            &prompts.plan,
            READER_MODEL,
            OutputMode::validated(
                Arc::new(RequiredFields::new(["episodes"])),
                json!({"episodes": []}),
            ),
        )
        .with_temperature(0.3)
        .with_context_window(16_384),
    );

    let write_scripts = MapGenerateStage::new(
        "write_scripts",
        "syllabus",
        "scripts",
        GenerationSettings::new(
            &prompts.write_script,
            WRITER_MODEL,
            OutputMode::json(json!({"dialogue": []})),
        )
        .with_temperature(0.7)
        .with_context_window(32_768),
    )
    .with_pointer("/episodes")
    .with_action("write_script");

    let translate = MapGenerateStage::new(
        "translate",
        "scripts",
        "translations",
        GenerationSettings::new(&prompts.translate, TRANSLATOR_MODEL, OutputMode::text(json!("")))
            .with_temperature(0.1)
            .with_context_window(8_192),
    );

    PipelineBuilder::new("draftflow")
        .stage(
            StageSpec::new(Arc::new(ingest))
                .then("analyze_chunks")
                .with_artifact("01_chunks"),
        )?
        .stage(
            StageSpec::new(Arc::new(analyze))
                .then("synthesize")
                .with_artifact("02_chunk_analyses"),
        )?
        .stage(
            StageSpec::new(Arc::new(synthesize))
                .with_edge(Edge::to("plan").when_flag(SKIP_CRITIQUE))
                .then("critique")
                .with_artifact("03_concept_graph"),
        )?
        .stage(
            StageSpec::new(Arc::new(critique))
                .with_edge(Edge::to("plan").when_flag(SKIP_RESEARCH))
                .then("enrich")
                .with_artifact("03c_critique_report"),
        )?
        .stage(
            StageSpec::new(Arc::new(enrich))
                .then("reading_material")
                .with_artifact("03d_enriched_context"),
        )?
        .stage(
            StageSpec::new(Arc::new(reading_material))
                .then("plan")
                .with_artifact("03e_reading_material"),
        )?
        .stage(
            StageSpec::new(Arc::new(plan))
                .then("write_scripts")
                .with_artifact("04_syllabus"),
        )?
        .stage(
            StageSpec::new(Arc::new(write_scripts))
                .with_edge(Edge::end().when_flag(SKIP_TRANSLATE))
                .then("translate")
                .with_artifact("05_scripts"),
        )?
        .stage(StageSpec::new(Arc::new(translate)).with_artifact("06_translations"))?
        .entry("ingest")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactWriter;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::core::RunStatus;
    use crate::pipeline::{RunRequest, Scheduler};
    use crate::stages::INPUT_PATH_KEY;
    use crate::state::RunState;
    use crate::testing::{config_map, fast_retry_invoker, ScriptedBackend};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn flags(pairs: &[(&str, bool)]) -> RunState {
        let config: BTreeMap<_, _> = pairs.iter().map(|(k, v)| ((*k).to_string(), json!(v))).collect();
        RunState::new("r", config)
    }

    #[test]
    fn test_default_pipeline_shape() {
        let graph = build_default_pipeline(&WorkflowPrompts::default()).unwrap();
        assert_eq!(
            graph.order(),
            [
                "ingest",
                "analyze_chunks",
                "synthesize",
                "critique",
                "enrich",
                "reading_material",
                "plan",
                "write_scripts",
                "translate"
            ]
        );
        assert_eq!(graph.spec("plan").unwrap().artifact.as_deref(), Some("04_syllabus"));
    }

    #[test]
    fn test_default_pipeline_branches() {
        let graph = build_default_pipeline(&WorkflowPrompts::default()).unwrap();
        assert_eq!(graph.active_path(&flags(&[])).len(), 9);
        assert_eq!(
            graph.active_path(&flags(&[(SKIP_CRITIQUE, true), (SKIP_TRANSLATE, true)])),
            vec!["ingest", "analyze_chunks", "synthesize", "plan", "write_scripts"]
        );
        assert_eq!(
            graph.active_path(&flags(&[(SKIP_RESEARCH, true)])),
            vec![
                "ingest",
                "analyze_chunks",
                "synthesize",
                "critique",
                "plan",
                "write_scripts",
                "translate"
            ]
        );
        // Skipping the critique skips everything built on it.
        assert!(!graph
            .active_path(&flags(&[(SKIP_CRITIQUE, true)]))
            .contains(&"enrich"));
    }

    #[test]
    fn test_prompts_deserialize_partially() {
        let prompts: WorkflowPrompts = toml::from_str("analyze = \"custom {item}\"").unwrap();
        assert_eq!(prompts.analyze, "custom {item}");
        assert_eq!(prompts.plan, WorkflowPrompts::default().plan);
    }

    fn scripted_backend() -> Arc<ScriptedBackend> {
        Arc::new(
            ScriptedBackend::new()
                .route("Plan a series", r#"{"episodes": [{"title": "e1"}, {"title": "e2"}]}"#)
                .route("Write the dialogue", r#"{"dialogue": [{"speaker": "A", "line": "hi"}]}"#)
                .route("study guide", "# Guide\n\nTwo parts.")
                .with_default_response(r#"{"concepts": [], "critiques": []}"#),
        )
    }

    fn book(dir: &std::path::Path) -> serde_json::Value {
        let input = dir.join("book.txt");
        std::fs::write(&input, "Preface\nPART I\nOne.\nPART II\nTwo.\n").unwrap();
        json!(input.to_string_lossy())
    }

    #[tokio::test]
    async fn test_end_to_end_with_scripted_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = scripted_backend();
        let graph = Arc::new(build_default_pipeline(&WorkflowPrompts::default()).unwrap());
        let config = config_map(&[
            (INPUT_PATH_KEY, book(dir.path())),
            (READER_MODEL, json!("reader")),
            (WRITER_MODEL, json!("writer")),
            (TRANSLATOR_MODEL, json!("translator")),
            (SKIP_TRANSLATE, json!(true)),
        ]);
        let artifacts = ArtifactWriter::new(dir.path().join("runs"));

        let report = Scheduler::new(graph, Arc::new(InMemoryCheckpointStore::new()))
            .with_invoker(fast_retry_invoker(backend.clone()))
            .with_artifacts(artifacts.clone())
            .run(RunRequest::new("r").with_config(config))
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.state.output("raw_chunks").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(report.state.output("scripts").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(report.state.output("translations"), None);
        assert_eq!(report.state.output("reading_material"), Some(&json!("# Guide\n\nTwo parts.")));
        // Text before the first heading is dropped.
        // 2 analyses, synthesize, critique, enrich, reading_material, plan, 2 scripts.
        assert_eq!(backend.calls(), 9);

        let guide = std::fs::read_to_string(artifacts.markdown_path_for("r", "03e_reading_material")).unwrap();
        assert_eq!(guide, "# Guide\n\nTwo parts.\n");
        let syllabus = std::fs::read_to_string(artifacts.markdown_path_for("r", "04_syllabus")).unwrap();
        assert!(syllabus.starts_with("# 04_syllabus\n\n## episodes"));
        assert!(syllabus.contains("### 2. e2"));
        assert!(artifacts.path_for("r", "03d_enriched_context").exists());
    }

    #[tokio::test]
    async fn test_skip_research_bypasses_enrichment() {
        let dir = tempfile::tempdir().unwrap();
        let backend = scripted_backend();
        let graph = Arc::new(build_default_pipeline(&WorkflowPrompts::default()).unwrap());
        let config = config_map(&[
            (INPUT_PATH_KEY, book(dir.path())),
            (READER_MODEL, json!("reader")),
            (WRITER_MODEL, json!("writer")),
            (SKIP_RESEARCH, json!(true)),
            (SKIP_TRANSLATE, json!(true)),
        ]);

        let report = Scheduler::new(graph, Arc::new(InMemoryCheckpointStore::new()))
            .with_invoker(fast_retry_invoker(backend.clone()))
            .run(RunRequest::new("r").with_config(config))
            .await
            .unwrap();

        assert!(report.is_completed());
        assert_eq!(
            report.executed,
            vec!["ingest", "analyze_chunks", "synthesize", "critique", "plan", "write_scripts"]
        );
        assert_eq!(report.state.output("enrichment"), None);
        assert!(backend.prompts().iter().all(|p| !p.contains("study guide")));
        assert_eq!(backend.calls(), 7);
    }
}
