//! Template responder behind the `reply` handler kind.

use async_trait::async_trait;
use kestrel_core::{BoxError, BoxedTransport, CanonicalMessage};
use serde_json::Value;

use crate::context::{ExecutionContext, RegisterContext};
use crate::plugin::core::CommandPlugin;
use crate::plugin::manifest::PluginManifest;

/// Answers every invocation with a rendered template.
///
/// Placeholders: `{sender}`, `{push_name}`, `{args}`, `{command}`.
#[derive(Debug, Clone)]
pub struct ReplyPlugin {
    template: String,
}

impl ReplyPlugin {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Builds the responder from the manifest's `reply` field.
    pub fn from_manifest(manifest: &PluginManifest) -> Result<Self, BoxError> {
        match manifest.reply.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(Self::new(text)),
            _ => Err(format!("plugin '{}' has no reply text", manifest.name).into()),
        }
    }

    pub fn render(&self, ctx: &ExecutionContext) -> String {
        let push_name = if ctx.push_name.is_empty() {
            ctx.sender_number.as_str()
        } else {
            ctx.push_name.as_str()
        };
        self.template
            .replace("{sender}", &ctx.sender_number)
            .replace("{push_name}", push_name)
            .replace("{args}", &ctx.args.join(" "))
            .replace("{command}", &ctx.command)
    }
}

#[async_trait]
impl CommandPlugin for ReplyPlugin {
    async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn execute(
        &self,
        msg: &CanonicalMessage,
        _transport: &BoxedTransport,
        ctx: &ExecutionContext,
    ) -> Result<Value, BoxError> {
        let text = self.render(ctx);
        msg.reply(&text).await;
        Ok(Value::String(text))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kestrel_core::{ReplyHandle, SendOptions, Transport, TransportResult};

    use super::*;
    use crate::context::Services;

    struct Null;

    #[async_trait]
    impl Transport for Null {
        async fn send(&self, _: &str, _: &str, _: SendOptions) -> TransportResult<()> {
            Ok(())
        }
    }

    #[test]
    fn requires_reply_text() {
        let mut manifest = PluginManifest::new("x");
        assert!(ReplyPlugin::from_manifest(&manifest).is_err());
        manifest.reply = Some("  ".into());
        assert!(ReplyPlugin::from_manifest(&manifest).is_err());
        manifest.reply = Some("hi".into());
        assert!(ReplyPlugin::from_manifest(&manifest).is_ok());
    }

    #[test]
    fn renders_placeholders() {
        let transport: BoxedTransport = Arc::new(Null);
        let mut msg = CanonicalMessage::new(
            "id",
            "62812@s.whatsapp.net",
            "62812@s.whatsapp.net",
            ReplyHandle::new(transport, "62812@s.whatsapp.net", None),
        );
        msg.command = "greet".into();
        msg.args = vec!["a".into(), "b".into()];
        let ctx = ExecutionContext::new(
            "greet",
            Arc::new(msg),
            Arc::new(Value::Null),
            Arc::new(Services::new()),
        );

        let plugin = ReplyPlugin::new("{command} {args} for {push_name} ({sender})");
        assert_eq!(plugin.render(&ctx), "greet a b for 62812 (62812)");
    }
}
