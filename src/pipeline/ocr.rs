//! OCR invocation: turn one page image into raw DeepSeek-OCR output.
//!
//! The model is an external collaborator reached through the [`OcrEngine`]
//! trait. Two engines ship with the crate:
//!
//! * [`OllamaCliEngine`] runs `ollama run deepseek-ocr` as a child process,
//!   passing the page path and prompt exactly like the interactive CLI.
//! * [`ProviderEngine`] sends the page as a base64 PNG to any
//!   `edgequake-llm` vision provider (ollama's HTTP API, OpenAI-compatible
//!   servers, …).
//!
//! ## Retry Strategy
//!
//! [`recognize_page`] wraps every call with the configured timeout and
//! exponential backoff (`retry_backoff_ms * 2^attempt`). A missing binary
//! is not retried: waiting will not install it.

use crate::config::{ConversionConfig, OcrBackend};
use crate::error::Ocr2MdError;
use crate::pipeline::encode;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use image::DynamicImage;
use std::io;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Everything an engine may need to read one page.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    /// 1-indexed page number.
    pub page: usize,
    /// PNG/JPEG file holding the page, for path-based engines.
    pub image_path: &'a Path,
    /// The same page, decoded.
    pub image: &'a DynamicImage,
    pub prompt: &'a str,
}

/// Raw model output for one page, tied to the page's source image.
///
/// The image is borrowed read-only: cropping never mutates the page.
#[derive(Debug, Clone)]
pub struct RawPage<'a> {
    pub index: usize,
    pub text: String,
    pub source_image: &'a DynamicImage,
}

#[derive(Debug, Error)]
pub enum OcrEngineError {
    #[error("`{binary}` not found. Install ollama and ensure it is on PATH.")]
    BinaryNotFound { binary: String },

    #[error("failed to run `{binary}`: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    #[error("{binary} failed ({status}): {stderr}")]
    NonZeroExit {
        binary: String,
        status: String,
        stderr: String,
    },

    #[error("provider '{provider}' failed: {detail}")]
    Provider { provider: String, detail: String },

    #[error("page encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

impl OcrEngineError {
    fn is_retryable(&self) -> bool {
        !matches!(self, OcrEngineError::BinaryNotFound { .. })
    }
}

/// A source of raw OCR text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short label for logs and error messages.
    fn name(&self) -> &str;

    /// Read one page and return the model's raw output.
    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, OcrEngineError>;
}

// ── ollama CLI ───────────────────────────────────────────────────────────────

/// Runs `<binary> run <model> "<image path>\n<prompt>"` and returns stdout.
#[derive(Debug, Clone)]
pub struct OllamaCliEngine {
    binary: String,
    model: String,
    label: String,
}

impl OllamaCliEngine {
    pub fn new(binary: impl Into<String>, model: impl Into<String>) -> Self {
        let binary = binary.into();
        let model = model.into();
        let label = format!("{binary} run {model}");
        Self {
            binary,
            model,
            label,
        }
    }
}

#[async_trait]
impl OcrEngine for OllamaCliEngine {
    fn name(&self) -> &str {
        &self.label
    }

    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, OcrEngineError> {
        let input = prompts::ollama_cli_input(request.image_path, request.prompt);
        debug!("Page {}: {} {:?}", request.page, self.label, input);

        let output = Command::new(&self.binary)
            .arg("run")
            .arg(&self.model)
            .arg(&input)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    OcrEngineError::BinaryNotFound {
                        binary: self.binary.clone(),
                    }
                } else {
                    OcrEngineError::Spawn {
                        binary: self.binary.clone(),
                        source: e,
                    }
                }
            })?;

        if !output.status.success() {
            let status = output
                .status
                .code()
                .map(|c| format!("exit {c}"))
                .unwrap_or_else(|| "terminated by signal".to_string());
            return Err(OcrEngineError::NonZeroExit {
                binary: self.binary.clone(),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

// ── edgequake-llm provider ───────────────────────────────────────────────────

/// Room for a dense page of Markdown plus its grounding tags.
const MAX_OUTPUT_TOKENS: usize = 8192;

/// Sends the page to a vision provider with the prompt as user text.
pub struct ProviderEngine {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderEngine {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }

    /// Instantiate a named provider (`"ollama"`, `"openai"`, …) for `model`.
    pub fn from_name(provider_name: &str, model: &str) -> Result<Self, Ocr2MdError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            Ocr2MdError::EngineNotConfigured {
                engine: provider_name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider, format!("{provider_name}/{model}")))
    }
}

#[async_trait]
impl OcrEngine for ProviderEngine {
    fn name(&self) -> &str {
        &self.label
    }

    async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, OcrEngineError> {
        let image = encode::encode_page(request.image)?;
        let messages = vec![ChatMessage::user_with_images(request.prompt, vec![image])];
        // OCR is transcription: no sampling creativity wanted.
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(MAX_OUTPUT_TOKENS),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| OcrEngineError::Provider {
                provider: self.label.clone(),
                detail: e.to_string(),
            })?;

        debug!(
            "Page {}: {} input tokens, {} output tokens",
            request.page, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content.trim().to_string())
    }
}

// ── Engine resolution & invocation ───────────────────────────────────────────

/// Pick the engine: a pre-built one wins, otherwise build from `backend`.
pub fn resolve_engine(config: &ConversionConfig) -> Result<Arc<dyn OcrEngine>, Ocr2MdError> {
    if let Some(ref engine) = config.engine {
        return Ok(Arc::clone(engine));
    }
    match &config.backend {
        OcrBackend::OllamaCli { binary, model } => {
            Ok(Arc::new(OllamaCliEngine::new(binary.clone(), model.clone())))
        }
        OcrBackend::Provider { name, model } => Ok(Arc::new(ProviderEngine::from_name(name, model)?)),
    }
}

/// Raw text for a page plus how many retries it took.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    pub retries: u32,
}

/// Run `engine` on one page with timeout and retries.
pub async fn recognize_page(
    engine: &Arc<dyn OcrEngine>,
    request: &OcrRequest<'_>,
    config: &ConversionConfig,
) -> Result<Recognition, OcrEngineError> {
    let limit = Duration::from_secs(config.ocr_timeout_secs);
    let mut last_err: Option<OcrEngineError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                request.page, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let err = match timeout(limit, engine.recognize(request)).await {
            Ok(Ok(text)) => {
                return Ok(Recognition {
                    text,
                    retries: attempt,
                })
            }
            Ok(Err(e)) => e,
            Err(_) => OcrEngineError::Timeout {
                secs: config.ocr_timeout_secs,
            },
        };

        warn!(
            "Page {}: {} attempt {} failed: {}",
            request.page,
            engine.name(),
            attempt + 1,
            err
        );
        let retryable = err.is_retryable();
        last_err = Some(err);
        if !retryable {
            break;
        }
    }

    Err(last_err.unwrap_or(OcrEngineError::Timeout {
        secs: config.ocr_timeout_secs,
    }))
}

/// Delay before retry number `attempt` (1-based), saturating at `u64::MAX`.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OcrEngine for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn recognize(&self, request: &OcrRequest<'_>) -> Result<String, OcrEngineError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(OcrEngineError::Provider {
                    provider: "flaky".into(),
                    detail: format!("503 on call {n}"),
                })
            } else {
                Ok(format!("page {}", request.page))
            }
        }
    }

    fn request<'a>(img: &'a DynamicImage) -> OcrRequest<'a> {
        OcrRequest {
            page: 2,
            image_path: Path::new("page_2.png"),
            image: img,
            prompt: prompts::DEFAULT_PROMPT,
        }
    }

    fn config(max_retries: u32) -> ConversionConfig {
        ConversionConfig::builder()
            .max_retries(max_retries)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[test]
    fn retries_until_success() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let engine: Arc<dyn OcrEngine> = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let out = tokio_test::block_on(recognize_page(&engine, &request(&img), &config(3)))
            .expect("third call succeeds");
        assert_eq!(out.text, "page 2");
        assert_eq!(out.retries, 2);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let engine: Arc<dyn OcrEngine> = Arc::new(Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let err = tokio_test::block_on(recognize_page(&engine, &request(&img), &config(1)))
            .expect_err("always failing");
        assert!(err.to_string().contains("503 on call 1"), "got: {err}");
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 65), u64::MAX);
        assert_eq!(backoff_ms(0, 200), 0);
    }

    #[test]
    fn many_instant_retries_do_not_overflow() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let engine: Arc<dyn OcrEngine> = Arc::new(Flaky {
            failures: 100,
            calls: AtomicU32::new(0),
        });
        let config = ConversionConfig::builder()
            .max_retries(80)
            .retry_backoff_ms(0)
            .build()
            .unwrap();
        let out = tokio_test::block_on(recognize_page(&engine, &request(&img), &config));
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_reported_without_retry() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        let engine: Arc<dyn OcrEngine> = Arc::new(OllamaCliEngine::new(
            "definitely-not-an-ollama-binary-7f3a",
            "deepseek-ocr",
        ));
        let err = recognize_page(&engine, &request(&img), &config(5))
            .await
            .expect_err("binary does not exist");
        assert!(matches!(err, OcrEngineError::BinaryNotFound { .. }), "got: {err}");
    }

    #[test]
    fn resolve_prefers_prebuilt_engine() {
        let engine: Arc<dyn OcrEngine> = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let config = ConversionConfig::builder()
            .engine(Arc::clone(&engine))
            .build()
            .unwrap();
        assert_eq!(resolve_engine(&config).unwrap().name(), "flaky");
    }

    #[test]
    fn default_backend_is_ollama_cli() {
        let engine = resolve_engine(&ConversionConfig::default()).unwrap();
        assert_eq!(engine.name(), "ollama run deepseek-ocr");
    }
}
