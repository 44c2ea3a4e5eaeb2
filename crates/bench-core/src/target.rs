use crate::config::{AwsConfig, TargetConfig, TargetKind};
use crate::invoker::{HttpInvoker, Invoker, LambdaInvoker, MockInvoker};
use anyhow::{Context, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::sync::Arc;
use tracing::info;

const DEFAULT_HTTP_TIMEOUT_MS: u64 = 5000;

pub async fn load_aws_config(aws: &AwsConfig) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &aws.region {
        loader = loader.region(Region::new(region.clone()));
    }
    loader.load().await
}

/// Read an output of an already deployed stack: the one named `output_key`,
/// or the first one.
pub async fn stack_output(
    config: &SdkConfig,
    stack_name: &str,
    output_key: Option<&str>,
) -> Result<String> {
    let client = aws_sdk_cloudformation::Client::new(config);
    let response = client
        .describe_stacks()
        .stack_name(stack_name)
        .send()
        .await
        .with_context(|| format!("describe stack {stack_name}"))?;

    let stack = response
        .stacks()
        .first()
        .with_context(|| format!("stack {stack_name} not found"))?;

    let output = match output_key {
        Some(key) => stack.outputs().iter().find(|o| o.output_key() == Some(key)),
        None => stack.outputs().first(),
    };

    output
        .and_then(|o| o.output_value())
        .map(str::to_string)
        .with_context(|| format!("stack {stack_name} has no usable output"))
}

/// Name of the function to invoke: given directly, or read from the stack.
pub async fn resolve_function_name(target: &TargetConfig, config: &SdkConfig) -> Result<String> {
    if let Some(name) = &target.function_name {
        return Ok(name.clone());
    }
    let stack_name = target
        .stack_name
        .as_deref()
        .context("lambda target needs function_name or stack_name")?;
    let name = stack_output(config, stack_name, target.output_key.as_deref()).await?;
    info!("Resolved function {} from stack {}", name, stack_name);
    Ok(name)
}

/// Build the invoker for the configured target kind.
pub async fn build_invoker(target: &TargetConfig, aws: &AwsConfig) -> Result<Arc<dyn Invoker>> {
    let invoker: Arc<dyn Invoker> = match target.kind {
        TargetKind::Mock => Arc::new(MockInvoker::new(target.mock_delay_ms.unwrap_or(5))),
        TargetKind::Http => {
            let url = target.url.as_deref().context("http target needs url")?;
            Arc::new(
                HttpInvoker::new(url, target.timeout_ms.unwrap_or(DEFAULT_HTTP_TIMEOUT_MS))
                    .context("Failed to create HTTP invoker")?,
            )
        }
        TargetKind::Lambda => {
            let config = load_aws_config(aws).await;
            let name = resolve_function_name(target, &config).await?;
            Arc::new(LambdaInvoker::new(&config, name))
        }
    };
    Ok(invoker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_mock_invoker() {
        let target = TargetConfig {
            kind: TargetKind::Mock,
            mock_delay_ms: Some(0),
            ..Default::default()
        };
        let invoker = build_invoker(&target, &AwsConfig::default()).await.unwrap();
        assert_eq!(invoker.name(), "mock");
        invoker.invoke().await.unwrap();
    }

    #[tokio::test]
    async fn test_http_target_requires_url() {
        let target = TargetConfig {
            kind: TargetKind::Http,
            ..Default::default()
        };
        let result = build_invoker(&target, &AwsConfig::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_explicit_function_name_skips_stack_lookup() {
        let target = TargetConfig {
            function_name: Some("fanout".to_string()),
            ..Default::default()
        };
        let config = SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .build();
        let name = resolve_function_name(&target, &config).await.unwrap();
        assert_eq!(name, "fanout");
    }
}
