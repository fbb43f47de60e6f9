//! Template stage (§4.5, Transform): replaces `{{name}}` placeholders using
//! `metadata["variables"]`, in the system prompt metadata and in message
//! content/parts. Missing variables leave their placeholder intact.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

pub struct TemplateStage {
    name: String,
}

impl TemplateStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
        let mut result = text.to_string();
        for (name, value) in vars {
            result = result.replace(&format!("{{{{{name}}}}}"), value);
        }
        result
    }

    fn variables_of(metadata: &serde_json::Map<String, Value>) -> Option<HashMap<String, String>> {
        let vars = metadata.get("variables")?.as_object()?;
        Some(
            vars.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
        )
    }
}

#[async_trait]
impl Stage for TemplateStage {
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
        loop {
            let mut elem = match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };

            let vars_source: serde_json::Map<String, Value> = elem
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if let Some(vars) = Self::variables_of(&vars_source) {
                if !vars.is_empty() {
                    if let Some(Value::String(prompt)) = elem.metadata.get_mut("system_prompt") {
                        *prompt = Self::substitute(prompt, &vars);
                    }
                    if let Some(message) = &mut elem.message {
                        message.content = Self::substitute(&message.content, &vars);
                        for part in &mut message.parts {
                            if let Some(text) = &part.text {
                                part.text = Some(Self::substitute(text, &vars));
                            }
                        }
                    }
                }
            }

            send_cancellable(&output, elem, cancel).await?;
        }
    }
}
