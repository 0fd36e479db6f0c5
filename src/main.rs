//! The Lambda `bootstrap` executable for the GUNW ingest functions.
//!
//! Every function in the pipeline is deployed with this same executable;
//! [`Services::dispatch`] works out which one is being invoked.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;

use gunw_ingest_lambda::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let svcs = Services::init().await?;
    let ref_svcs = &svcs;

    run(service_fn(|event: LambdaEvent<Value>| async move {
        let (payload, context) = event.into_parts();
        ref_svcs
            .dispatch(context.invoked_function_arn, Some(payload))
            .await
    }))
    .await?;
    Ok(())
}
