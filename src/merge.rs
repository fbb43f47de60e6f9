//! Merge stage: fixed fan-in, one worker per input (§4.3).
//!
//! Each worker forwards its input to the shared output, stamping
//! `metadata["merge_input_index"]` with its ordinal. Order between workers
//! is unspecified; order within a single input is preserved because each
//! worker only ever touches its own input channel.

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::Result;
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender};
use serde_json::Value;

pub const MERGE_INPUT_INDEX_KEY: &str = "merge_input_index";

/// Runs `inputs.len()` workers concurrently, forwarding every element to
/// `output` with its source index stamped on. Closes `output` exactly once,
/// after every worker finishes — success or cancellation alike.
pub async fn process_multiple(
    cancel: &CancelToken,
    inputs: Vec<ElementReceiver>,
    output: ElementSender,
) -> Result<()> {
    let mut handles = Vec::with_capacity(inputs.len());
    for (index, input) in inputs.into_iter().enumerate() {
        let cancel = cancel.clone();
        let output = output.clone();
        handles.push(tokio::spawn(async move {
            worker(index, cancel, input, output).await
        }));
    }
    drop(output);

    let mut first_err = None;
    for handle in handles {
        if let Ok(Err(e)) = handle.await {
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn worker(
    index: usize,
    cancel: CancelToken,
    mut input: ElementReceiver,
    output: ElementSender,
) -> Result<()> {
    loop {
        match recv_cancellable(&mut input, &cancel).await? {
            Some(mut elem) => {
                elem.metadata
                    .insert(MERGE_INPUT_INDEX_KEY.to_string(), Value::from(index));
                send_cancellable(&output, elem, &cancel).await?;
            }
            None => return Ok(()),
        }
    }
}

/// Degenerate single-input merge, provided for uniformity with the
/// multi-input path.
pub async fn process(
    cancel: &CancelToken,
    input: ElementReceiver,
    output: ElementSender,
) -> Result<()> {
    process_multiple(cancel, vec![input], output).await
}
