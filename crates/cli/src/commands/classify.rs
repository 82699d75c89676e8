//! Classify command handler.

use clap::Args;
use relay_core::AppResult;
use relay_knowledge::classifier::indicator_hits;
use relay_knowledge::{describe, recommend_tools};

/// Classify a query
#[derive(Args, Debug)]
pub struct ClassifyCommand {
    /// Query text
    pub query: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl ClassifyCommand {
    pub fn execute(&self) -> AppResult<()> {
        let hits = indicator_hits(&self.query);
        let classification = hits.classification();
        let tools = recommend_tools(classification);

        if self.json {
            let output = serde_json::json!({
                "classification": classification,
                "description": describe(classification),
                "tools": tools,
                "indicators": hits,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", classification);
            println!("{}", describe(classification));
            println!("Tools: {}", tools.join(", "));
        }

        Ok(())
    }
}
