use std::fmt;

use super::{Protocol, ProtocolError};
use crate::frame::Frame;

/// Broker specific overlay on the generic STOMP frames.
///
/// Selected once from the CONNECTED `server` banner and fixed for the
/// lifetime of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    ActiveMq,
    RabbitMq,
    Apollo,
    OpenMq,
    Generic,
}

impl Dialect {
    /// Pick the dialect from a `server` header such as
    /// `ActiveMQ/5.18.3` or `RabbitMQ/3.12.0`. Unknown banners map to
    /// [`Dialect::Generic`].
    pub fn from_server(server: Option<&str>) -> Self {
        let Some(banner) = server else {
            return Dialect::Generic;
        };
        let banner = banner.to_ascii_lowercase();
        if banner.contains("activemq") {
            Dialect::ActiveMq
        } else if banner.contains("rabbitmq") {
            Dialect::RabbitMq
        } else if banner.contains("apollo") {
            Dialect::Apollo
        } else if banner.contains("open message queue") || banner.contains("openmq") {
            Dialect::OpenMq
        } else {
            Dialect::Generic
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::ActiveMq => "ActiveMQ",
            Dialect::RabbitMq => "RabbitMQ",
            Dialect::Apollo => "Apollo",
            Dialect::OpenMq => "OpenMQ",
            Dialect::Generic => "generic",
        }
    }

    pub fn supports_requeue(&self) -> bool {
        matches!(self, Dialect::RabbitMq)
    }

    /// OpenMQ needs the subscription header on acknowledgements even on
    /// STOMP 1.0.
    pub(super) fn acks_need_subscription(&self) -> bool {
        matches!(self, Dialect::OpenMq)
    }

    pub(super) fn decorate_subscribe(
        &self,
        frame: &mut Frame,
        protocol: &Protocol,
        name: &str,
        durable: bool,
    ) -> Result<(), ProtocolError> {
        let prefetch = protocol.prefetch().to_string();
        match self {
            Dialect::ActiveMq => {
                frame.set("activemq.prefetchSize", Some(prefetch.as_str()));
                if durable {
                    activemq_durable_name(frame, protocol, name)?;
                }
            }
            Dialect::RabbitMq => {
                frame.set("prefetch-count", Some(prefetch.as_str()));
                if durable {
                    frame.set("persistent", Some("true"));
                }
            }
            Dialect::Apollo => {
                if durable {
                    frame.set("persistent", Some("true"));
                }
            }
            Dialect::OpenMq | Dialect::Generic => {}
        }
        Ok(())
    }

    pub(super) fn decorate_unsubscribe(
        &self,
        frame: &mut Frame,
        protocol: &Protocol,
        name: &str,
        durable: bool,
    ) -> Result<(), ProtocolError> {
        if !durable {
            return Ok(());
        }
        match self {
            Dialect::ActiveMq => activemq_durable_name(frame, protocol, name)?,
            Dialect::RabbitMq | Dialect::Apollo => frame.set("persistent", Some("true")),
            Dialect::OpenMq | Dialect::Generic => {}
        }
        Ok(())
    }
}

// ActiveMQ keys durable subscriptions on client-id plus subscription name.
fn activemq_durable_name(
    frame: &mut Frame,
    protocol: &Protocol,
    name: &str,
) -> Result<(), ProtocolError> {
    if protocol.client_id().is_none() {
        return Err(ProtocolError::DurableRequiresClientId);
    }
    frame.set("activemq.subscriptionName", Some(name));
    frame.set("durable-subscriber-name", Some(name));
    Ok(())
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
