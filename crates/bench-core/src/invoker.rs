use anyhow::{Context, Result};
use aws_config::SdkConfig;
use aws_sdk_lambda::types::InvocationType;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;

pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Submits one invocation against the fan-out target.
///
/// Resolving means the target accepted the request, not that the delivery
/// paths behind it have finished.
pub trait Invoker: Send + Sync {
    fn name(&self) -> &'static str;

    fn invoke(&self) -> InvokeFuture<'_>;
}

/// Mock invoker for testing (configurable delay, optional periodic failures)
pub struct MockInvoker {
    delay_ms: u64,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl MockInvoker {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Fail every `n`th call.
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Invoker for MockInvoker {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn invoke(&self) -> InvokeFuture<'_> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            match self.fail_every {
                Some(n) if call % n == 0 => anyhow::bail!("mock invocation {call} failed"),
                _ => Ok(()),
            }
        })
    }
}

/// Asynchronous (`Event`) Lambda invocation of the fan-out function.
pub struct LambdaInvoker {
    client: aws_sdk_lambda::Client,
    function_name: String,
}

impl LambdaInvoker {
    pub fn new(config: &SdkConfig, function_name: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_lambda::Client::new(config),
            function_name: function_name.into(),
        }
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }
}

impl Invoker for LambdaInvoker {
    fn name(&self) -> &'static str {
        "lambda"
    }

    fn invoke(&self) -> InvokeFuture<'_> {
        Box::pin(async move {
            let output = self
                .client
                .invoke()
                .function_name(&self.function_name)
                .invocation_type(InvocationType::Event)
                .send()
                .await
                .with_context(|| format!("invoke {}", self.function_name))?;

            let status = output.status_code();
            if !(200..300).contains(&status) {
                anyhow::bail!("invoke {} returned status {}", self.function_name, status);
            }
            Ok(())
        })
    }
}

/// GET against an HTTP-fronted fan-out endpoint.
pub struct HttpInvoker {
    client: reqwest::Client,
    url: String,
}

impl HttpInvoker {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Invoker for HttpInvoker {
    fn name(&self) -> &'static str {
        "http"
    }

    fn invoke(&self) -> InvokeFuture<'_> {
        Box::pin(async move {
            self.client
                .get(&self.url)
                .send()
                .await
                .with_context(|| format!("GET {}", self.url))?
                .error_for_status()?;
            Ok(())
        })
    }
}
