//! Broadcast router: every element to every output, registration order.
//! Partial delivery is not tracked — if one send is preempted by
//! cancellation, the whole `process` returns the cancellation error.

use super::{send_to_output, OutputTable, Router};
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::stage::{recv_cancellable, ElementReceiver, ElementSender};
use async_trait::async_trait;

pub struct BroadcastRouter {
    name: String,
    outputs: OutputTable,
}

impl BroadcastRouter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outputs: OutputTable::new(),
        }
    }

    pub fn register_output(&self, name: impl Into<String>, sender: ElementSender) {
        self.outputs.register(name, sender);
    }
}

#[async_trait]
impl Router for BroadcastRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, cancel: &CancelToken, mut input: ElementReceiver) -> Result<()> {
        let result = self.run(cancel, &mut input).await;
        self.outputs.close_all();
        result
    }
}

impl BroadcastRouter {
    async fn run(&self, cancel: &CancelToken, input: &mut ElementReceiver) -> Result<()> {
        loop {
            let elem = match recv_cancellable(input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };
            for (_, sender) in self.outputs.all() {
                send_to_output(&sender, elem.clone(), cancel).await?;
            }
        }
    }
}
