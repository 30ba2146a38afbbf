//! Embeddings command implementation.
//!
//! Provides CLI commands for managing the image embedding provider:
//! - `status` - Show provider availability and configuration
//! - `configure` - Configure embedding provider settings
//! - `test` - Embed one image end to end

use crate::cli::EmbeddingsCommands;
use crate::cli::commands::runtime;
use crate::embeddings::{
    detect_available_providers, get_embedding_settings, is_embeddings_enabled, reset_embedding_settings,
    resolve_embed_endpoint, resolve_embed_model, resolve_hf_endpoint, resolve_hf_model,
    resolve_provider_type, save_embedding_settings, EmbeddingProviderType, EmbeddingSettings, Extractor,
};
use crate::error::{Error, Result};
use crate::probe::load_image_file;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

/// Output for embeddings status command.
#[derive(Serialize)]
struct StatusOutput {
    enabled: bool,
    configured_provider: Option<String>,
    available_providers: Vec<ProviderStatus>,
    recommended: Option<String>,
}

#[derive(Serialize)]
struct ProviderStatus {
    name: String,
    available: bool,
    model: String,
    endpoint: String,
}

/// Output for embeddings test command.
#[derive(Serialize)]
struct TestOutput {
    success: bool,
    image: String,
    dimensions: usize,
    norm: f32,
    embedding_sample: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Output for configure command.
#[derive(Serialize)]
struct ConfigureOutput {
    success: bool,
    message: String,
    settings: EmbeddingSettings,
}

/// Execute embeddings command.
///
/// # Errors
///
/// Returns an error if the settings cannot be saved or the test image cannot
/// be embedded.
pub fn execute(command: EmbeddingsCommands, json: bool) -> Result<()> {
    runtime()?.block_on(async { execute_async(command, json).await })
}

async fn execute_async(command: EmbeddingsCommands, json: bool) -> Result<()> {
    match command {
        EmbeddingsCommands::Status => execute_status(json).await,
        EmbeddingsCommands::Configure {
            provider,
            enable,
            disable,
            model,
            endpoint,
            token,
            reset,
        } => {
            if reset {
                return execute_reset(json);
            }
            let changes = SettingsChanges {
                provider,
                enable,
                disable,
                model,
                endpoint,
                token,
            };
            execute_configure(changes, json).await
        }
        EmbeddingsCommands::Test { image } => execute_test(&image, json).await,
    }
}

/// Show embeddings status and provider availability.
async fn execute_status(json: bool) -> Result<()> {
    let enabled = is_embeddings_enabled();
    let configured_provider = resolve_provider_type().map(|p| p.to_string());
    let detection = detect_available_providers().await;

    let providers = vec![
        ProviderStatus {
            name: EmbeddingProviderType::Http.to_string(),
            available: detection.available.iter().any(|p| p == "http"),
            model: resolve_embed_model(),
            endpoint: resolve_embed_endpoint(),
        },
        ProviderStatus {
            name: EmbeddingProviderType::Huggingface.to_string(),
            available: detection.available.iter().any(|p| p == "huggingface"),
            model: resolve_hf_model(),
            endpoint: resolve_hf_endpoint(),
        },
    ];

    if json {
        let output = StatusOutput {
            enabled,
            configured_provider,
            available_providers: providers,
            recommended: detection.recommended,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!("{}", "Embeddings Status".bold());
    println!();
    println!("Enabled: {}", if enabled { "yes".green() } else { "no".red() });
    if let Some(ref p) = configured_provider {
        println!("Configured Provider: {p}");
    }
    println!();

    println!("Providers:");
    for p in &providers {
        let status = if p.available { "✓".green() } else { "✗".red() };
        println!("  {status} {:<12} {} @ {}", p.name, p.model, p.endpoint.dimmed());
    }

    if enabled && detection.available.is_empty() {
        println!();
        println!("No embedding provider available.");
        println!();
        println!("To enable embeddings:");
        println!("  - Start an image embedding server (e.g. infinity) at EMBED_ENDPOINT");
        println!("  - Or set the HF_TOKEN environment variable");
    }
    Ok(())
}

/// Requested changes to the stored settings.
struct SettingsChanges {
    provider: Option<String>,
    enable: bool,
    disable: bool,
    model: Option<String>,
    endpoint: Option<String>,
    token: Option<String>,
}

/// Apply `changes` to `settings`, returning what changed.
fn apply_changes(settings: &mut EmbeddingSettings, changes: SettingsChanges) -> Result<Vec<&'static str>> {
    let mut messages = Vec::new();

    if changes.enable && changes.disable {
        return Err(Error::InvalidArgument(
            "Cannot specify both --enable and --disable".to_string(),
        ));
    }

    if changes.enable {
        settings.enabled = Some(true);
        messages.push("Embeddings enabled");
    } else if changes.disable {
        settings.enabled = Some(false);
        messages.push("Embeddings disabled");
    }

    if let Some(ref p) = changes.provider {
        let provider_type: EmbeddingProviderType = p.parse().map_err(Error::InvalidArgument)?;
        settings.provider = Some(provider_type);
        messages.push("Provider configured");
    }

    // Model, endpoint and token apply to the selected provider
    let provider_type = settings.provider.unwrap_or(EmbeddingProviderType::Http);

    if let Some(m) = changes.model {
        match provider_type {
            EmbeddingProviderType::Http => settings.EMBED_MODEL = Some(m),
            EmbeddingProviderType::Huggingface => settings.HF_MODEL = Some(m),
        }
        messages.push("Model configured");
    }

    if let Some(e) = changes.endpoint {
        match provider_type {
            EmbeddingProviderType::Http => settings.EMBED_ENDPOINT = Some(e),
            EmbeddingProviderType::Huggingface => settings.HF_ENDPOINT = Some(e),
        }
        messages.push("Endpoint configured");
    }

    if let Some(t) = changes.token {
        match provider_type {
            EmbeddingProviderType::Http => settings.EMBED_API_KEY = Some(t),
            EmbeddingProviderType::Huggingface => settings.HF_TOKEN = Some(t),
        }
        messages.push("Token configured");
    }

    Ok(messages)
}

/// Configure embedding settings.
async fn execute_configure(changes: SettingsChanges, json: bool) -> Result<()> {
    let mut settings = get_embedding_settings()?.unwrap_or_default();
    let messages = apply_changes(&mut settings, changes)?;

    if messages.is_empty() {
        // Nothing to change, just show the current state
        return execute_status(json).await;
    }

    save_embedding_settings(&settings)?;
    let message = messages.join(", ");

    if json {
        let output = ConfigureOutput {
            success: true,
            message,
            settings: redacted(settings),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Configuration updated: {message}");
        println!();
        execute_status(false).await?;
    }

    Ok(())
}

fn execute_reset(json: bool) -> Result<()> {
    reset_embedding_settings()?;
    if json {
        println!("{}", serde_json::json!({ "success": true, "message": "Embedding settings reset" }));
    } else {
        println!("Embedding settings reset to defaults.");
    }
    Ok(())
}

/// Mask secrets before echoing settings back.
fn redacted(mut settings: EmbeddingSettings) -> EmbeddingSettings {
    for secret in [&mut settings.HF_TOKEN, &mut settings.EMBED_API_KEY] {
        if secret.is_some() {
            *secret = Some("***".to_string());
        }
    }
    settings
}

/// Embed one image through the full extractor path.
async fn execute_test(image: &Path, json: bool) -> Result<()> {
    let result = async {
        let decoded = load_image_file(image)?;
        Extractor::from_settings().extract(&decoded).await
    }
    .await;

    match result {
        Ok(embedding) => {
            let sample: Vec<f32> = embedding.iter().take(5).copied().collect();
            let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();

            if json {
                let output = TestOutput {
                    success: true,
                    image: image.to_string_lossy().into_owned(),
                    dimensions: embedding.len(),
                    norm,
                    embedding_sample: sample,
                    error: None,
                };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!("Embedding Test: {}", "SUCCESS".green());
                println!();
                println!("Image:      {}", image.display());
                println!("Dimensions: {}", embedding.len());
                println!("Norm:       {norm:.6}");
                println!();
                println!("Sample (first 5 values):");
                for (i, v) in sample.iter().enumerate() {
                    println!("  [{i}] {v:.6}");
                }
            }
            Ok(())
        }
        Err(e) => {
            if json {
                let output = TestOutput {
                    success: false,
                    image: image.to_string_lossy().into_owned(),
                    dimensions: 0,
                    norm: 0.0,
                    embedding_sample: vec![],
                    error: Some(e.to_string()),
                };
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!("Embedding Test: {}", "FAILED".red());
                println!();
                println!("Image: {}", image.display());
                println!("Error: {e}");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changes() -> SettingsChanges {
        SettingsChanges {
            provider: None,
            enable: false,
            disable: false,
            model: None,
            endpoint: None,
            token: None,
        }
    }

    #[test]
    fn test_model_and_token_follow_selected_provider() {
        let mut settings = EmbeddingSettings::default();
        let messages = apply_changes(
            &mut settings,
            SettingsChanges {
                provider: Some("hf".into()),
                model: Some("vinid/plip".into()),
                token: Some("hf_secret".into()),
                ..changes()
            },
        )
        .unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(settings.provider, Some(EmbeddingProviderType::Huggingface));
        assert_eq!(settings.HF_MODEL.as_deref(), Some("vinid/plip"));
        assert!(settings.EMBED_MODEL.is_none());

        let shown = serde_json::to_value(redacted(settings)).unwrap();
        assert_eq!(shown["HF_TOKEN"], "***");
    }

    #[test]
    fn test_invalid_changes() {
        let mut settings = EmbeddingSettings::default();
        let both = apply_changes(&mut settings, SettingsChanges { enable: true, disable: true, ..changes() });
        assert!(both.is_err());

        let unknown = apply_changes(&mut settings, SettingsChanges { provider: Some("ollama".into()), ..changes() });
        assert_eq!(unknown.unwrap_err().error_code().as_str(), "INVALID_ARGUMENT");

        assert!(apply_changes(&mut settings, changes()).unwrap().is_empty());
    }

    #[test]
    fn test_provider_status_serialization() {
        let status = ProviderStatus {
            name: "http".to_string(),
            available: true,
            model: "vinid/plip".to_string(),
            endpoint: "http://localhost:7997".to_string(),
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("vinid/plip"));
        assert!(json.contains("7997"));
    }
}
