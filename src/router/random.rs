//! Random router: uniform, independent draw over the output list per
//! element.

use super::{send_to_output, OutputTable, Router};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::stage::{recv_cancellable, ElementReceiver, ElementSender};
use async_trait::async_trait;
use rand::Rng;

pub struct RandomRouter {
    name: String,
    output_names: Vec<String>,
    outputs: OutputTable,
}

impl RandomRouter {
    pub fn new(name: impl Into<String>, output_names: Vec<String>) -> Result<Self> {
        if output_names.is_empty() {
            return Err(Error::InvalidConfig(
                "random router needs at least one output".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            output_names,
            outputs: OutputTable::new(),
        })
    }

    pub fn register_output(&self, name: impl Into<String>, sender: ElementSender) {
        self.outputs.register(name, sender);
    }
}

#[async_trait]
impl Router for RandomRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, cancel: &CancelToken, mut input: ElementReceiver) -> Result<()> {
        let result = self.run(cancel, &mut input).await;
        self.outputs.close_all();
        result
    }
}

impl RandomRouter {
    async fn run(&self, cancel: &CancelToken, input: &mut ElementReceiver) -> Result<()> {
        loop {
            let elem = match recv_cancellable(input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };
            let idx = rand::thread_rng().gen_range(0..self.output_names.len());
            let name = &self.output_names[idx];
            if let Some(sender) = self.outputs.get(name) {
                send_to_output(&sender, elem, cancel).await?;
            }
        }
    }
}
