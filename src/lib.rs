//! The AWS/Lambda-powered GUNW ingest pipeline
//!
//! This library crate implements every step of the pipeline that takes a
//! delivered Sentinel-1 GUNW product, checks it, stores it, describes it to
//! CMR, and tells the world about it. Sequencing is left to a Step Functions
//! state machine; each step is a small, stateless Lambda function.
//!
//! All of the functions are compiled into one executable, `bootstrap`, which
//! figures out which function it is from the invoked function ARN. The
//! `gunw-ingest-lambda-oneshot` executable runs a single invocation from the
//! command line, which is handy for local testing.

use lambda_runtime::tracing;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub mod advertise;
pub mod cmr;
pub mod config;
pub mod echo10;
pub mod error;
pub mod granule;
pub mod ingest;
pub mod invoke;
pub mod metrics;
pub mod notify;
pub mod package;
pub mod s3objects;
pub mod token;
pub mod topic;
pub mod umm;
pub mod verify;

use config::{Config, Maturity};
pub use error::{Error, Result};

/// Consulted when a local runtime emulator invokes us as `test_function`.
pub const LOCALTEST_ARN_VAR: &str = "GUNW_LOCALTEST_ARN";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Function {
    Ingest,
    Package,
    Verify,
    Invoke,
    Echo10Construction,
    MetadataConstruction,
    CmrSubmit,
    CmrToken,
    Notify,
    Advertise,
    Metrics,
}

const FUNCTION_SUFFIXES: &[(&str, Function)] = &[
    ("echo10-construction", Function::Echo10Construction),
    ("metadata-construction", Function::MetadataConstruction),
    ("cmr-submit", Function::CmrSubmit),
    ("cmr-token", Function::CmrToken),
    ("invoke-ingest", Function::Invoke),
    ("ingest", Function::Ingest),
    ("package", Function::Package),
    ("verify", Function::Verify),
    ("invoke", Function::Invoke),
    ("notify", Function::Notify),
    ("advertise", Function::Advertise),
    ("metrics", Function::Metrics),
];

impl Function {
    /// Identify the function from an invoked function ARN, or from a bare
    /// function name.
    pub fn from_arn(arn: &str) -> Result<Self> {
        // arn:aws:lambda:<region>:<account>:function:<name>[:<qualifier>]
        let name = if arn.starts_with("arn:") {
            arn.split(':').nth(6).unwrap_or(arn)
        } else {
            arn
        };

        FUNCTION_SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, f)| *f)
            .ok_or_else(|| Error::UnknownFunction(arn.to_owned()))
    }
}

/// Deserialize a handler's input.
pub fn parse_payload<T: DeserializeOwned>(payload: Option<Value>) -> Result<T> {
    let payload = payload.ok_or_else(|| Error::InvalidMessage("no input provided".to_owned()))?;
    serde_json::from_value(payload)
        .map_err(|e| Error::InvalidMessage(format!("unexpected input: {}", e)))
}

pub struct Services {
    sdk_config: aws_config::SdkConfig,
    s3c: aws_sdk_s3::Client,
    sfn: aws_sdk_sfn::Client,
    sns: aws_sdk_sns::Client,
    lambda: aws_sdk_lambda::Client,
    cloudwatch: aws_sdk_cloudwatch::Client,
    secrets: aws_sdk_secretsmanager::Client,
    http: reqwest::Client,
    cmr_token: Mutex<Option<String>>,
}

impl Services {
    /// Create a state object for the ingest Lambda functions.
    pub async fn init() -> Result<Self> {
        // Configuration errors surface again, with context, at dispatch time.
        let directive = Config::load(Maturity::Latest)
            .map(|c| c.filter_directive())
            .unwrap_or("info");
        init_logging(directive);

        let sdk_config = aws_config::load_from_env().await;

        Ok(Services {
            s3c: aws_sdk_s3::Client::new(&sdk_config),
            sfn: aws_sdk_sfn::Client::new(&sdk_config),
            sns: aws_sdk_sns::Client::new(&sdk_config),
            lambda: aws_sdk_lambda::Client::new(&sdk_config),
            cloudwatch: aws_sdk_cloudwatch::Client::new(&sdk_config),
            secrets: aws_sdk_secretsmanager::Client::new(&sdk_config),
            http: reqwest::Client::builder().build()?,
            cmr_token: Mutex::new(None),
            sdk_config,
        })
    }

    /// Handle an invocation of one of the ingest functions.
    ///
    /// As with the rest of this crate, we "know" which function is being
    /// invoked by looking at the suffix of the function name in the ARN. The
    /// ARN's qualifier, if it's one of the maturity aliases, also picks the
    /// configuration to use.
    pub async fn dispatch(&self, mut arn: String, payload: Option<Value>) -> Result<Value> {
        // Local testing environment?
        if arn.ends_with(":test_function") {
            arn = std::env::var(LOCALTEST_ARN_VAR).map_err(|_| {
                Error::Config(format!("{} must be set for local testing", LOCALTEST_ARN_VAR))
            })?;
        }

        let function = Function::from_arn(&arn)?;
        let maturity = Maturity::from_arn(&arn);
        let config = Config::load(maturity)?;

        tracing::info!("invoked as {:?} ({})", function, maturity.as_str());
        tracing::debug!("payload: {:?}", payload);

        let result = self.run(function, payload, &config).await;

        if let Err(e) = &result {
            tracing::error!("{:?} failed with {}: {}", function, e.code(), e);
        }

        result
    }

    async fn run(&self, function: Function, payload: Option<Value>, config: &Config) -> Result<Value> {
        match function {
            Function::Ingest => ingest::handler(payload, config, &self.s3c).await,
            Function::Package => package::handler(payload, config, &self.s3c).await,
            Function::Verify => verify::handler(payload, &self.s3c, &self.sdk_config).await,
            Function::Invoke => invoke::handler(payload, config, &self.sfn).await,
            Function::Echo10Construction => echo10::handler(payload, config, &self.s3c).await,
            Function::MetadataConstruction => umm::handler(payload, config, &self.s3c).await,
            Function::CmrSubmit => {
                cmr::handler(
                    payload,
                    config,
                    &self.s3c,
                    &self.lambda,
                    &self.http,
                    &self.cmr_token,
                )
                .await
            }
            Function::CmrToken => {
                token::handler(payload, config, &self.secrets, &self.s3c, &self.http).await
            }
            Function::Notify => notify::handler(payload, config, &self.sdk_config).await,
            Function::Advertise => advertise::handler(payload, config, &self.http, &self.sns).await,
            Function::Metrics => {
                metrics::handler(payload, config, &self.sfn, &self.cloudwatch).await
            }
        }
    }
}

fn init_logging(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false) // don't print the module name
        .without_time() // don't print time (CloudWatch has it)
        .finish();

    // A second init (as in tests) keeps the first subscriber.
    if tracing::dispatcher::set_global_default(tracing::Dispatch::new(subscriber)).is_ok() {
        let _ = tracing_log::LogTracer::init();
    }
}
