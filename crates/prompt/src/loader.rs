//! Prompt loader for YAML prompt definitions.

use crate::types::PromptDefinition;
use relay_core::{AppError, AppResult};
use std::path::{Path, PathBuf};

/// Directory, relative to the workspace, holding prompt definitions.
pub const PROMPTS_DIR: &str = ".relay/prompts";

fn prompts_dir(workspace_path: &Path) -> PathBuf {
    workspace_path.join(PROMPTS_DIR)
}

/// Load a prompt definition by ID from `.relay/prompts/<id>.yml`.
///
/// # Example
/// ```no_run
/// use relay_prompt::load_prompt;
/// use std::path::Path;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let prompt = load_prompt(Path::new("."), "support.chat")?;
/// println!("Loaded prompt: {}", prompt.title);
/// # Ok(())
/// # }
/// ```
pub fn load_prompt(workspace_path: &Path, prompt_id: &str) -> AppResult<PromptDefinition> {
    let prompt_file = prompts_dir(workspace_path).join(format!("{}.yml", prompt_id));

    tracing::debug!("Loading prompt from: {:?}", prompt_file);

    if !prompt_file.exists() {
        return Err(AppError::Prompt(format!(
            "Prompt file not found: {:?}",
            prompt_file
        )));
    }

    let contents = std::fs::read_to_string(&prompt_file).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to read prompt file {:?}: {}",
            prompt_file, e
        ))
    })?;

    let definition: PromptDefinition = serde_yaml::from_str(&contents).map_err(|e| {
        AppError::Prompt(format!(
            "Failed to parse prompt YAML {:?}: {}",
            prompt_file, e
        ))
    })?;

    validate_prompt(&definition)?;

    if definition.id != prompt_id {
        tracing::warn!(
            "Prompt file {:?} declares id '{}'",
            prompt_file,
            definition.id
        );
    }

    tracing::info!("Loaded prompt: {} ({})", definition.id, definition.title);

    Ok(definition)
}

/// List available prompt IDs in the workspace, sorted.
pub fn list_prompts(workspace_path: &Path) -> AppResult<Vec<String>> {
    let dir = prompts_dir(workspace_path);

    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut prompt_ids: Vec<String> = walkdir::WalkDir::new(&dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| {
            entry.path().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("yml")
        })
        .filter_map(|entry| {
            entry
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
        })
        .collect();

    prompt_ids.sort();
    Ok(prompt_ids)
}

fn validate_prompt(def: &PromptDefinition) -> AppResult<()> {
    if def.id.trim().is_empty() {
        return Err(AppError::Prompt("Prompt ID cannot be empty".to_string()));
    }

    if def.title.trim().is_empty() {
        return Err(AppError::Prompt("Prompt title cannot be empty".to_string()));
    }

    if !def.api_version.contains('.') {
        return Err(AppError::Prompt(format!(
            "Invalid apiVersion format: '{}'. Expected format: 'x.y'",
            def.api_version
        )));
    }

    if def.system.trim().is_empty() {
        return Err(AppError::Prompt(
            "Prompt system template cannot be empty".to_string(),
        ));
    }

    if !def.user.contains("{{query}}") {
        return Err(AppError::Prompt(format!(
            "Prompt '{}' user template never renders {{{{query}}}}",
            def.id
        )));
    }

    if def.max_history == Some(0) {
        tracing::debug!("Prompt '{}' excludes conversation history", def.id);
    }

    Ok(())
}
