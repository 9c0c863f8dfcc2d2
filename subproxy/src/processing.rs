use crate::types::NodeCandidate;
use tracing::debug;

/// One step of the node-processing pipeline.
pub trait ProcessingStage: Send + Sync {
    fn process(&self, nodes: Vec<NodeCandidate>) -> Vec<NodeCandidate>;

    fn stage_name(&self) -> String;
}

/// Drops nodes whose name contains any exclusion keyword, case-insensitively.
pub struct KeywordFilterStage {
    keywords: Vec<String>,
}

impl KeywordFilterStage {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords.to_vec(),
        }
    }
}

impl ProcessingStage for KeywordFilterStage {
    fn process(&self, nodes: Vec<NodeCandidate>) -> Vec<NodeCandidate> {
        filter_nodes(nodes, &self.keywords)
    }

    fn stage_name(&self) -> String {
        "keyword_filter".to_string()
    }
}

/// Assigns `node-001`, `node-002`, ... in list order.
pub struct RenameStage;

impl ProcessingStage for RenameStage {
    fn process(&self, nodes: Vec<NodeCandidate>) -> Vec<NodeCandidate> {
        rename_nodes(nodes)
    }

    fn stage_name(&self) -> String {
        "rename".to_string()
    }
}

/// Ordered list of stages.
pub struct NodePipeline {
    stages: Vec<Box<dyn ProcessingStage>>,
}

impl NodePipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Filter, then rename. Renaming last keeps numbering dense.
    pub fn standard(exclude_keywords: &[String]) -> Self {
        let mut pipeline = Self::new();
        pipeline.add_stage(Box::new(KeywordFilterStage::new(exclude_keywords)));
        pipeline.add_stage(Box::new(RenameStage));
        pipeline
    }

    pub fn add_stage(&mut self, stage: Box<dyn ProcessingStage>) {
        self.stages.push(stage);
    }

    pub fn run(&self, nodes: Vec<NodeCandidate>) -> Vec<NodeCandidate> {
        self.stages.iter().fold(nodes, |nodes, stage| {
            let before = nodes.len();
            let nodes = stage.process(nodes);
            debug!("Stage {}: {} -> {} nodes", stage.stage_name(), before, nodes.len());
            nodes
        })
    }
}

impl Default for NodePipeline {
    fn default() -> Self {
        Self::new()
    }
}

pub fn filter_nodes(nodes: Vec<NodeCandidate>, exclude_keywords: &[String]) -> Vec<NodeCandidate> {
    if exclude_keywords.is_empty() {
        return nodes;
    }

    let keywords: Vec<String> = exclude_keywords
        .iter()
        .filter(|keyword| !keyword.is_empty())
        .map(|keyword| keyword.to_lowercase())
        .collect();

    nodes
        .into_iter()
        .filter(|node| {
            let name = node.match_name().to_lowercase();
            !keywords.iter().any(|keyword| name.contains(keyword.as_str()))
        })
        .collect()
}

pub fn rename_nodes(nodes: Vec<NodeCandidate>) -> Vec<NodeCandidate> {
    nodes
        .into_iter()
        .enumerate()
        .map(|(index, mut node)| {
            let tag = format!("node-{:03}", index + 1);
            node.name = tag.clone();
            node.tag = tag;
            node
        })
        .collect()
}
