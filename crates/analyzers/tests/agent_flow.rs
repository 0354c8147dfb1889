use insight_analyzers::{
    execute, AgentContext, AnalysisTarget, Analyzer, LlmProvider, ProficiencyAgent,
    ScriptedLlmProvider, DEFAULT_AGENT_TIMEOUT, PROFICIENCY_AGENT,
};
use insight_graph::{GraphStore, MemoryGraphStore};
use insight_parser::parse_repository;
use insight_vector_store::{
    CachedEmbedder, ChunkInput, Chunker, HashEmbeddingProvider, MemoryBlobCache,
    MemoryVectorStore, SemanticIndex,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn load_graph(root: &std::path::Path) -> Arc<MemoryGraphStore> {
    let graph = parse_repository(root).unwrap();
    let store = Arc::new(MemoryGraphStore::new());
    let mut nodes = HashMap::new();
    for node in graph.nodes {
        nodes.entry(node.node_type).or_insert_with(Vec::new).push(node);
    }
    for (node_type, batch) in nodes {
        store.upsert_nodes(node_type, batch).await.unwrap();
    }
    let mut edges = HashMap::new();
    for edge in graph.edges {
        edges.entry(edge.edge_type).or_insert_with(Vec::new).push(edge);
    }
    for (edge_type, batch) in edges {
        store.create_edges(edge_type, batch).await.unwrap();
    }
    store
}

async fn semantic_index(root: &std::path::Path, files: &[&str]) -> Arc<SemanticIndex> {
    let embedder = Arc::new(CachedEmbedder::new(
        Arc::new(HashEmbeddingProvider::new(64)),
        Arc::new(MemoryBlobCache::default()),
    ));
    let index = SemanticIndex::new(embedder, Arc::new(MemoryVectorStore::new()));
    let chunker = Chunker::default();
    let mut inputs = Vec::new();
    for file in files {
        let content = std::fs::read_to_string(root.join(file)).unwrap();
        for chunk in chunker.chunk(&format!("file:{file}"), &content) {
            inputs.push(ChunkInput {
                commit_hash: "c0ffee".into(),
                analysis_id: "run-1".into(),
                file_path: file.to_string(),
                chunk,
            });
        }
    }
    index.index_batch(&inputs).await.unwrap();
    Arc::new(index)
}

#[tokio::test]
async fn proficiency_agent_combines_graph_vectors_and_llm() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("services")).unwrap();
    std::fs::write(
        root.join("services/billing_service.py"),
        "def charge(amount):\n    if amount > 0:\n        return amount\n    return 0\n",
    )
    .unwrap();
    std::fs::write(
        root.join("main.py"),
        "import services.billing_service\n\ndef run():\n    return services.billing_service.charge(3)\n",
    )
    .unwrap();

    let graph = load_graph(root).await;
    let semantic =
        semantic_index(root, &["services/billing_service.py", "main.py"]).await;
    let reply = json!({
        "level": "Senior",
        "confidence": 0.8,
        "reasoning": "Small, focused service module.",
        "suggestions": ["Validate negative amounts explicitly"]
    })
    .to_string();
    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedLlmProvider::new([reply]));

    let ctx = AgentContext {
        analysis_id: "run-1".into(),
        graph: graph.clone(),
        semantic,
        llm,
        tool_results: BTreeMap::new(),
    };
    let envelope = execute(
        Arc::new(ProficiencyAgent::new()),
        AnalysisTarget::new(root, "services/billing_service.py"),
        Arc::new(ctx),
        DEFAULT_AGENT_TIMEOUT,
        &CancellationToken::new(),
    )
    .await;

    assert!(envelope.is_success(), "{:?}", envelope.error());
    assert_eq!(envelope.tool_name, PROFICIENCY_AGENT);
    assert_eq!(envelope.payload["level"], json!("Senior"));
    assert_eq!(envelope.payload["graph_insights"]["layer"], json!("business_logic"));
    assert_eq!(envelope.payload["graph_insights"]["incoming_deps"], json!(1));
    assert!(envelope.payload["tokens_used"].as_u64().unwrap() > 0);
    assert_eq!(envelope.metadata["llm_model"], json!("scripted"));
    assert_eq!(envelope.metadata["tokens_used"], envelope.payload["tokens_used"]);
}

struct FailingLlm;

#[async_trait::async_trait]
impl LlmProvider for FailingLlm {
    fn model_id(&self) -> &str {
        "failing"
    }

    async fn invoke(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
    ) -> insight_analyzers::Result<insight_analyzers::LlmResponse> {
        Err(insight_analyzers::AnalyzerError::Llm("rate limited".into()))
    }
}

#[tokio::test]
async fn llm_failure_yields_agent_failure_envelope() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
    let ctx = AgentContext {
        analysis_id: "run-1".into(),
        graph: load_graph(dir.path()).await,
        semantic: semantic_index(dir.path(), &["a.py"]).await,
        llm: Arc::new(FailingLlm),
        tool_results: BTreeMap::new(),
    };
    let agent = Arc::new(ProficiencyAgent::new());
    assert!(agent.is_applicable("a.py"));

    let envelope = execute(
        agent,
        AnalysisTarget::new(dir.path(), "a.py"),
        Arc::new(ctx),
        DEFAULT_AGENT_TIMEOUT,
        &CancellationToken::new(),
    )
    .await;
    assert!(!envelope.is_success());
    assert_eq!(envelope.error_type(), Some("LlmError"));
    assert_eq!(envelope.metadata["llm_model"], json!("failing"));
}
