//! The metrics service: publish pipeline gauges to CloudWatch.
//!
//! The metric data to send is laid out in configuration, in the shape of a
//! `PutMetricData` request. We fill in the values of the metrics we know how
//! to compute and send the lot.

use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use aws_sdk_sfn::types::ExecutionStatus;
use lambda_runtime::tracing;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{config::Config, error::Result};

pub const SECTION: &str = "metrics";
pub const INGESTS_RUNNING: &str = "IngestsRunning";

const PAGE_SIZE: i32 = 1000;

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub step_function_arn: String,
    pub cloudwatch_metrics: MetricsRequest,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricsRequest {
    pub namespace: String,
    pub metric_data: Vec<MetricSpec>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricSpec {
    pub metric_name: String,
    #[serde(default)]
    pub dimensions: Vec<DimensionSpec>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DimensionSpec {
    pub name: String,
    pub value: String,
}

/// Set the value of every configured metric we have a measurement for.
pub fn fill_values(specs: &mut [MetricSpec], values: &BTreeMap<&str, f64>) {
    for spec in specs {
        if let Some(v) = values.get(spec.metric_name.as_str()) {
            spec.value = Some(*v);
        }
    }
}

fn to_datum(spec: &MetricSpec) -> MetricDatum {
    let mut b = MetricDatum::builder().metric_name(&spec.metric_name);

    if let Some(v) = spec.value {
        b = b.value(v);
    }

    if let Some(u) = &spec.unit {
        b = b.unit(StandardUnit::from(u.as_str()));
    }

    for d in &spec.dimensions {
        b = b.dimensions(Dimension::builder().name(&d.name).value(&d.value).build());
    }

    b.build()
}

pub async fn count_running(sfn: &aws_sdk_sfn::Client, state_machine_arn: &str) -> Result<usize> {
    let mut count = 0;
    let mut next_token = None;

    loop {
        let resp = sfn
            .list_executions()
            .state_machine_arn(state_machine_arn)
            .status_filter(ExecutionStatus::Running)
            .max_results(PAGE_SIZE)
            .set_next_token(next_token)
            .send()
            .await?;

        count += resp.executions().len();

        match resp.next_token() {
            Some(t) => next_token = Some(t.to_owned()),
            None => break,
        }
    }

    Ok(count)
}

pub async fn handler(
    _payload: Option<Value>,
    config: &Config,
    sfn: &aws_sdk_sfn::Client,
    cloudwatch: &aws_sdk_cloudwatch::Client,
) -> Result<Value> {
    let config: MetricsConfig = config.section(SECTION)?;

    let running = count_running(sfn, &config.step_function_arn).await?;
    let values = BTreeMap::from([(INGESTS_RUNNING, running as f64)]);
    tracing::info!("metric values: {:?}", values);

    let mut request = config.cloudwatch_metrics;
    fill_values(&mut request.metric_data, &values);

    let data = request.metric_data.iter().map(to_datum).collect();

    cloudwatch
        .put_metric_data()
        .namespace(&request.namespace)
        .set_metric_data(Some(data))
        .send()
        .await?;

    Ok(Value::Null)
}
