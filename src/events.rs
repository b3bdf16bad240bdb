//! Emit domain events for other services.
//!
//! Fire and forget: sagas never fail because the bus is down. Delivery is
//! at-least-once from the consumer's point of view.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{
    AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo,
};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::Serialize;
use url::Url;

use crate::config::Amqp;
use crate::error::{Result, ServerError};

const DEFAULT_AMQP_HOST: &str = "localhost";
const DEFAULT_AMQP_PORT: u16 = 5672;
const DEFAULT_AMQP_VHOST: &str = "/";

const CONTENT_ENCODING: &str = "utf8";
const CONTENT_TYPE: &str = "application/cloudevents+json";
const DATA_CONTENT_TYPE: &str = "application/json";
const CLOUDEVENT_VERSION: &str = "1.0";
const EVENT_SOURCE: &str = "com.fanclub.users";
const ID_LENGTH: usize = 12;

/// Domain event names carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Event {
    UserCreated,
    UserProfileUpdated,
    UserDeleted,
    UserTeamsUpdated,
    UserSportCategoriesUpdated,
    #[serde(rename = "membership-upgraded")]
    MembershipUpgraded,
    #[serde(rename = "role-assigned")]
    RoleAssigned,
    UserPaymentLinked,
}

impl Event {
    /// Wire name, matching what downstream consumers subscribe to.
    pub fn name(self) -> &'static str {
        match self {
            Event::UserCreated => "UserCreated",
            Event::UserProfileUpdated => "UserProfileUpdated",
            Event::UserDeleted => "UserDeleted",
            Event::UserTeamsUpdated => "UserTeamsUpdated",
            Event::UserSportCategoriesUpdated => "UserSportCategoriesUpdated",
            Event::MembershipUpgraded => "membership-upgraded",
            Event::RoleAssigned => "role-assigned",
            Event::UserPaymentLinked => "UserPaymentLinked",
        }
    }
}

#[derive(Debug, Serialize)]
struct Cloudevent {
    specversion: &'static str,
    r#type: &'static str,
    source: &'static str,
    id: String,
    time: String,
    datacontenttype: &'static str,
    data: serde_json::Value,
}

/// Event bus producer.
#[derive(Clone, Default)]
pub struct EventPublisher {
    queue: String,
    conn: Option<Arc<Connection>>,
}

impl EventPublisher {
    /// Create a new [`EventPublisher`].
    pub async fn new(config: &Amqp) -> Result<Self> {
        let addr = Url::parse(&config.address).map_err(|err| {
            ServerError::Internal {
                details: err.to_string(),
            }
        })?;
        let uri = AMQPUri {
            scheme: AMQPScheme::from_str(addr.scheme()).map_err(|err| {
                ServerError::Internal {
                    details: err.to_string(),
                }
            })?,
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: config.username.clone(),
                    password: config.password.clone(),
                },
                host: addr.host_str().unwrap_or(DEFAULT_AMQP_HOST).into(),
                port: addr.port().unwrap_or(DEFAULT_AMQP_PORT),
            },
            vhost: config
                .vhost
                .clone()
                .unwrap_or(DEFAULT_AMQP_VHOST.to_string()),
            query: AMQPQueryString {
                channel_max: config.pool,
                ..Default::default()
            },
        };

        let conn_config = ConnectionProperties::default()
            .with_connection_name("fanclub_users_producer".into());
        let conn =
            Connection::connect_uri(uri, conn_config).await.map_err(
                |err| ServerError::Internal {
                    details: err.to_string(),
                },
            )?;

        tracing::info!(%addr, queue = config.queue, "event bus connected");

        Ok(Self {
            queue: config.queue.clone(),
            conn: Some(Arc::new(conn)),
        })
    }

    async fn create_channel(
        conn: Arc<Connection>,
        queue: &str,
    ) -> Result<Channel> {
        let channel = conn.create_channel().await.map_err(internal)?;
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(internal)?;
        Ok(channel)
    }

    fn envelope(event: Event, data: serde_json::Value) -> Cloudevent {
        let id = Alphanumeric.sample_string(&mut OsRng, ID_LENGTH);
        Cloudevent {
            specversion: CLOUDEVENT_VERSION,
            r#type: event.name(),
            source: EVENT_SOURCE,
            id,
            time: Utc::now().to_rfc3339(),
            datacontenttype: DATA_CONTENT_TYPE,
            data,
        }
    }

    /// Publish a domain event.
    ///
    /// An unconfigured publisher only logs; sagas treat any error from here
    /// as a side channel through [`EventPublisher::publish_or_log`].
    pub async fn publish(
        &self,
        event: Event,
        data: serde_json::Value,
    ) -> Result<()> {
        let Some(conn) = &self.conn else {
            tracing::debug!(event = event.name(), "event bus not configured");
            return Ok(());
        };
        let channel =
            Self::create_channel(Arc::clone(conn), &self.queue).await?;

        let payload = Self::envelope(event, data);
        let payload =
            serde_json::to_string(&payload).map_err(|err| {
                ServerError::Internal {
                    details: err.to_string(),
                }
            })?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_content_encoding(CONTENT_ENCODING.into())
                    .with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(internal)?;

        tracing::trace!(event = event.name(), "event published");
        Ok(())
    }

    /// Best-effort publication: failures never reach the caller.
    pub async fn publish_or_log(&self, event: Event, data: serde_json::Value) {
        if let Err(err) = self.publish(event, data).await {
            tracing::error!(
                event = event.name(),
                error = %err,
                "event publication failed"
            );
        }
    }
}

fn internal(err: lapin::Error) -> ServerError {
    ServerError::Internal {
        details: err.to_string(),
    }
}
