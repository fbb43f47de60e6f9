//! Variable provider stage (§4.5, Transform): resolves every registered
//! `VariableProvider` once before processing any element, then injects the
//! merged result into `metadata["variables"]` on every passing element.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::external::services::VariableProvider;
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub struct VariableProviderStage {
    name: String,
    providers: Vec<Arc<dyn VariableProvider>>,
}

impl VariableProviderStage {
    pub fn new(name: impl Into<String>, providers: Vec<Arc<dyn VariableProvider>>) -> Self {
        Self {
            name: name.into(),
            providers,
        }
    }

    async fn resolve_all(&self) -> Result<HashMap<String, String>> {
        let mut merged = HashMap::new();
        for provider in &self.providers {
            let resolved = provider.resolve().await?;
            merged.extend(resolved);
        }
        Ok(merged)
    }
}

#[async_trait]
impl Stage for VariableProviderStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage_type(&self) -> StageType {
        StageType::Transform
    }

    async fn process(
        &self,
        cancel: &CancelToken,
        mut input: ElementReceiver,
        output: ElementSender,
    ) -> Result<()> {
        let resolved = self.resolve_all().await?;

        loop {
            let mut elem = match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };

            if !resolved.is_empty() {
                let entry = elem
                    .metadata
                    .entry("variables".to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(existing) = entry {
                    for (k, v) in &resolved {
                        existing.insert(k.clone(), Value::String(v.clone()));
                    }
                } else {
                    let mut map = serde_json::Map::new();
                    for (k, v) in &resolved {
                        map.insert(k.clone(), Value::String(v.clone()));
                    }
                    *entry = Value::Object(map);
                }
            }

            send_cancellable(&output, elem, cancel).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StreamElement;
    use crate::error::Error;
    use tokio::sync::mpsc;

    struct FixedProvider(Vec<(&'static str, &'static str)>);

    #[async_trait]
    impl VariableProvider for FixedProvider {
        async fn resolve(&self) -> Result<HashMap<String, String>> {
            Ok(self
                .0
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl VariableProvider for FailingProvider {
        async fn resolve(&self) -> Result<HashMap<String, String>> {
            Err(Error::resource("variable_provider", "unreachable"))
        }
    }

    #[tokio::test]
    async fn later_providers_override_earlier_ones() {
        let stage = VariableProviderStage::new(
            "vars",
            vec![
                Arc::new(FixedProvider(vec![("name", "first"), ("a", "1")])),
                Arc::new(FixedProvider(vec![("name", "second")])),
            ],
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx.send(StreamElement::text("hi")).await.unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        let out = out_rx.recv().await.unwrap();
        let vars = out.metadata["variables"].as_object().unwrap();
        assert_eq!(vars["name"], "second");
        assert_eq!(vars["a"], "1");
    }

    #[tokio::test]
    async fn merges_with_preexisting_variables() {
        let stage = VariableProviderStage::new(
            "vars",
            vec![Arc::new(FixedProvider(vec![("b", "2")]))],
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        let mut existing = serde_json::Map::new();
        existing.insert("a".into(), Value::String("1".into()));
        let elem = StreamElement::text("hi")
            .with_metadata("variables".into(), Value::Object(existing));
        in_tx.send(elem).await.unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        let out = out_rx.recv().await.unwrap();
        let vars = out.metadata["variables"].as_object().unwrap();
        assert_eq!(vars["a"], "1");
        assert_eq!(vars["b"], "2");
    }

    #[tokio::test]
    async fn failing_provider_aborts_the_stage() {
        let stage = VariableProviderStage::new("vars", vec![Arc::new(FailingProvider)]);
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, _out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        drop(in_tx);
        let err = stage.process(&cancel, in_rx, out_tx).await.unwrap_err();
        assert!(!err.is_cancelled());
    }
}
