//! Optional scenario enhancement.
//!
//! An enhancer rewrites the deterministic rendering of a scenario into a
//! richer test. Its output is only used when it passes a shape check;
//! anything else falls back to the deterministic source.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EnhancerConfig;
use crate::domain::TestScenario;
use crate::extract::scanner::blank_noise;

/// Text-generation collaborator for test sources.
#[async_trait]
pub trait ScenarioEnhancer: Send + Sync {
    /// Return a complete replacement translation unit for `baseline`.
    async fn enhance(&self, scenario: &TestScenario, baseline: &str) -> Result<String>;
}

/// Why enhanced text was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("no TEST or TEST_F macro")]
    NoTestMacro,
    #[error("framework header not included")]
    NoFrameworkInclude,
    #[error("target operation is never mentioned")]
    OperationMissing,
    #[error("unbalanced braces or parentheses")]
    Unbalanced,
}

/// Shape check applied to enhancer output.
pub fn validate_enhanced(source: &str, scenario: &TestScenario) -> Result<(), ShapeError> {
    let code = blank_noise(source);
    if !(code.contains("TEST(") || code.contains("TEST_F(")) {
        return Err(ShapeError::NoTestMacro);
    }
    if !source.contains("gtest/gtest.h") {
        return Err(ShapeError::NoFrameworkInclude);
    }
    let name = scenario.operation.name.trim_start_matches('~');
    if !code.contains(name) {
        return Err(ShapeError::OperationMissing);
    }
    let mut braces = 0i64;
    let mut parens = 0i64;
    for ch in code.chars() {
        match ch {
            '{' => braces += 1,
            '}' => braces -= 1,
            '(' => parens += 1,
            ')' => parens -= 1,
            _ => {}
        }
        if braces < 0 || parens < 0 {
            return Err(ShapeError::Unbalanced);
        }
    }
    if braces != 0 || parens != 0 {
        return Err(ShapeError::Unbalanced);
    }
    Ok(())
}

/// Pull the code out of a fenced reply; unfenced replies are used as is.
pub fn extract_code(reply: &str) -> String {
    let Some(start) = reply.find("```") else {
        return reply.trim().to_string();
    };
    let after_fence = &reply[start + 3..];
    // Skip the info string (`cpp`, `c++`).
    let body = after_fence.split_once('\n').map_or("", |(_, rest)| rest);
    let end = body.find("```").unwrap_or(body.len());
    body[..end].trim().to_string()
}

/// Ask the enhancer and keep its answer only if it has the right shape.
/// Returns the source to compile and whether it came from the enhancer.
pub async fn enhance_or_baseline(
    enhancer: &dyn ScenarioEnhancer,
    scenario: &TestScenario,
    baseline: &str,
) -> (String, bool) {
    match enhancer.enhance(scenario, baseline).await {
        Ok(reply) => {
            let code = extract_code(&reply);
            match validate_enhanced(&code, scenario) {
                Ok(()) => {
                    debug!(scenario = %scenario.id, "Using enhanced test source");
                    (code, true)
                }
                Err(reason) => {
                    warn!(scenario = %scenario.id, reason = %reason, "Enhanced source rejected");
                    (baseline.to_string(), false)
                }
            }
        }
        Err(e) => {
            warn!(scenario = %scenario.id, error = %e, "Enhancer failed");
            (baseline.to_string(), false)
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Enhancer backed by an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaEnhancer {
    endpoint: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaEnhancer {
    pub fn new(config: &EnhancerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("unitforge/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            http_client,
        })
    }

    fn prompt(scenario: &TestScenario, baseline: &str) -> String {
        format!(
            "You are improving a GoogleTest unit test for the C++ operation `{}`.\n\
             Keep every #include line, keep the test compiling against the same headers, \
             and only strengthen the assertions or add calls that exercise more code paths.\n\
             Reply with one complete C++ translation unit in a single ```cpp fenced block.\n\n\
             ```cpp\n{}\n```\n",
            scenario.operation.signature(),
            baseline
        )
    }
}

#[async_trait]
impl ScenarioEnhancer for OllamaEnhancer {
    async fn enhance(&self, scenario: &TestScenario, baseline: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.endpoint);
        let request = GenerateRequest {
            model: &self.model,
            prompt: Self::prompt(scenario, baseline),
            stream: false,
        };
        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;
        if !response.status().is_success() {
            return Err(anyhow!("enhancer returned HTTP {}", response.status()));
        }
        let body: GenerateResponse = response.json().await.context("Invalid enhancer response")?;
        Ok(body.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExpectedOutcome, OperationModel, StrategyTag};
    use std::path::PathBuf;

    fn scenario() -> TestScenario {
        let op = OperationModel::method("Shape", "Area", "int");
        TestScenario {
            id: TestScenario::scenario_id(&op, StrategyTag::NoThrow),
            strategy: StrategyTag::NoThrow,
            operation: op,
            header: PathBuf::from("Shape.h"),
            receiver: Some(Vec::new()),
            arguments: Vec::new(),
            calls: 1,
            expected: ExpectedOutcome::MustNotThrow,
        }
    }

    const GOOD: &str = "#include <gtest/gtest.h>\n#include \"Shape.h\"\nTEST(Shape, Area) { Shape s{}; EXPECT_GE(s.Area(), 0); }\n";

    struct Canned(Result<String, String>);

    #[async_trait]
    impl ScenarioEnhancer for Canned {
        async fn enhance(&self, _: &TestScenario, _: &str) -> Result<String> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_test() {
        assert_eq!(validate_enhanced(GOOD, &scenario()), Ok(()));
    }

    #[test]
    fn test_validate_rejections() {
        let s = scenario();
        assert_eq!(
            validate_enhanced("#include <gtest/gtest.h>\nint main() { Area(); }", &s),
            Err(ShapeError::NoTestMacro)
        );
        assert_eq!(
            validate_enhanced("TEST(A, B) { s.Area(); }", &s),
            Err(ShapeError::NoFrameworkInclude)
        );
        assert_eq!(
            validate_enhanced("#include <gtest/gtest.h>\nTEST(A, B) { s.Size(); }", &s),
            Err(ShapeError::OperationMissing)
        );
        assert_eq!(
            validate_enhanced("#include <gtest/gtest.h>\nTEST(A, B) { s.Area(); ", &s),
            Err(ShapeError::Unbalanced)
        );
        // Braces inside string literals do not count.
        let quoted = "#include <gtest/gtest.h>\nTEST(A, B) { s.Area(); puts(\"{\"); }";
        assert_eq!(validate_enhanced(quoted, &s), Ok(()));
    }

    #[test]
    fn test_extract_code_from_fence() {
        let reply = format!("Here you go:\n```cpp\n{}```\nDone.", GOOD);
        assert_eq!(extract_code(&reply), GOOD.trim());
        assert_eq!(extract_code("  plain  "), "plain");
    }

    #[tokio::test]
    async fn test_enhance_or_baseline_falls_back() {
        let s = scenario();
        let (src, enhanced) = enhance_or_baseline(&Canned(Ok(GOOD.to_string())), &s, "base").await;
        assert!(enhanced);
        assert_eq!(src, GOOD.trim());

        let (src, enhanced) = enhance_or_baseline(&Canned(Ok("nonsense".to_string())), &s, "base").await;
        assert!(!enhanced);
        assert_eq!(src, "base");

        let (src, enhanced) = enhance_or_baseline(&Canned(Err("refused".to_string())), &s, "base").await;
        assert!(!enhanced);
        assert_eq!(src, "base");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        let config = EnhancerConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            model: "m".to_string(),
            timeout_secs: 2,
        };
        let enhancer = OllamaEnhancer::new(&config).unwrap();
        assert!(enhancer.enhance(&scenario(), "base").await.is_err());
    }
}
