//! Round-robin router: element *n* goes to output `n mod k`, strict modular
//! order.

use super::{send_to_output, OutputTable, Router};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::stage::{recv_cancellable, ElementReceiver, ElementSender};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct RoundRobinRouter {
    name: String,
    output_names: Vec<String>,
    outputs: OutputTable,
    counter: AtomicU64,
}

impl RoundRobinRouter {
    pub fn new(name: impl Into<String>, output_names: Vec<String>) -> Result<Self> {
        if output_names.is_empty() {
            return Err(Error::InvalidConfig(
                "round-robin router needs at least one output".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            output_names,
            outputs: OutputTable::new(),
            counter: AtomicU64::new(0),
        })
    }

    pub fn register_output(&self, name: impl Into<String>, sender: ElementSender) {
        self.outputs.register(name, sender);
    }
}

#[async_trait]
impl Router for RoundRobinRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, cancel: &CancelToken, mut input: ElementReceiver) -> Result<()> {
        let result = self.run(cancel, &mut input).await;
        self.outputs.close_all();
        result
    }
}

impl RoundRobinRouter {
    async fn run(&self, cancel: &CancelToken, input: &mut ElementReceiver) -> Result<()> {
        let k = self.output_names.len() as u64;
        loop {
            let elem = match recv_cancellable(input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let name = &self.output_names[(n % k) as usize];
            if let Some(sender) = self.outputs.get(name) {
                send_to_output(&sender, elem, cancel).await?;
            }
        }
    }
}
