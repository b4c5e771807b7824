//! Event vocabulary of the game hub.
//!
//! Every event name maps to exactly one payload type. [`HubEvent`] is the
//! closed union of all of them and [`EventKind`] its payload-free
//! discriminant, used as the key for listener registration. Domain events
//! arrive as server invocations; lifecycle events are produced locally by
//! the client and are never accepted from the wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{
    ChatScope, DayNightCycle, MovementState, Position, StopReason, WorldEventType,
};

/// Binds a payload type to its event kind.
pub trait EventPayload: Sized {
    const KIND: EventKind;

    /// Borrow the payload if `event` is of this kind.
    fn from_event(event: &HubEvent) -> Option<&Self>;

    fn into_event(self) -> HubEvent;
}

macro_rules! hub_events {
    (
        domain { $($domain:ident),* $(,)? }
        lifecycle { $($life:ident),* $(,)? }
    ) => {
        /// Name of a hub event.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $($domain,)*
            $($life,)*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[
                $(EventKind::$domain,)*
                $(EventKind::$life,)*
            ];

            /// Wire name, identical to the hub method the server invokes.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventKind::$domain => stringify!($domain),)*
                    $(EventKind::$life => stringify!($life),)*
                }
            }

            /// Lifecycle kinds are emitted by the client itself.
            pub fn is_lifecycle(&self) -> bool {
                matches!(self, $(EventKind::$life)|*)
            }
        }

        /// An event together with its payload.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "event", content = "data")]
        pub enum HubEvent {
            $($domain($domain),)*
            $($life($life),)*
        }

        impl HubEvent {
            pub fn kind(&self) -> EventKind {
                match self {
                    $(HubEvent::$domain(_) => EventKind::$domain,)*
                    $(HubEvent::$life(_) => EventKind::$life,)*
                }
            }
        }

        $(
            impl EventPayload for $domain {
                const KIND: EventKind = EventKind::$domain;

                fn from_event(event: &HubEvent) -> Option<&Self> {
                    match event {
                        HubEvent::$domain(payload) => Some(payload),
                        _ => None,
                    }
                }

                fn into_event(self) -> HubEvent {
                    HubEvent::$domain(self)
                }
            }
        )*

        $(
            impl EventPayload for $life {
                const KIND: EventKind = EventKind::$life;

                fn from_event(event: &HubEvent) -> Option<&Self> {
                    match event {
                        HubEvent::$life(payload) => Some(payload),
                        _ => None,
                    }
                }

                fn into_event(self) -> HubEvent {
                    HubEvent::$life(self)
                }
            }
        )*
    };
}

hub_events! {
    domain {
        ActionCompleted,
        ActionStarted,
        ActionFailed,
        ActionQueueUpdated,
        CharacterMoving,
        CharacterStopped,
        CharacterMoved,
        CharacterStatsUpdated,
        CharacterHealthChanged,
        CharacterLevelUp,
        SettlementResourceUpdated,
        SettlementBuildingCompleted,
        SettlementPopulationChanged,
        MilitaryOrderCreated,
        MilitaryOrderStatusChanged,
        MilitaryOrderCompleted,
        CombatStarted,
        CombatRoundComplete,
        CombatEnded,
        WorldTimeUpdate,
        WorldTimeUpdated,
        WorldWeatherChanged,
        WorldEvent,
        ChatMessage,
        MessageReceived,
        PartyInvite,
        PartyMemberJoined,
        PartyMemberLeft,
        CraftingStarted,
        CraftingCompleted,
        CraftingFailed,
        MarketListingCreated,
        MarketListingSold,
        MarketPriceUpdated,
    }
    lifecycle {
        Connected,
        Disconnected,
        Reconnecting,
        Reconnected,
    }
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<EventKind> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a server invocation could not be turned into a [`HubEvent`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventDecodeError {
    #[error("unknown hub event `{0}`")]
    UnknownTarget(String),
    #[error("`{0}` is a client lifecycle event and cannot be sent by the server")]
    Reserved(EventKind),
    #[error("malformed `{kind}` payload: {message}")]
    Malformed { kind: EventKind, message: String },
}

impl HubEvent {
    /// Decode a server invocation (`target` plus arguments) into an event.
    /// Only the first argument carries the payload.
    pub fn from_invocation(target: &str, arguments: Vec<Value>) -> Result<HubEvent, EventDecodeError> {
        let kind = EventKind::from_name(target)
            .ok_or_else(|| EventDecodeError::UnknownTarget(target.to_string()))?;
        if kind.is_lifecycle() {
            return Err(EventDecodeError::Reserved(kind));
        }

        let data = arguments.into_iter().next().unwrap_or(Value::Null);
        serde_json::from_value(serde_json::json!({ "event": target, "data": data })).map_err(|e| {
            EventDecodeError::Malformed {
                kind,
                message: e.to_string(),
            }
        })
    }
}

// --- Action queue ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCompleted {
    pub character_id: String,
    pub action_id: String,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStarted {
    pub character_id: String,
    pub action_id: String,
    #[serde(default)]
    pub action: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFailed {
    pub character_id: String,
    pub action_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionQueueUpdated {
    pub character_id: String,
    #[serde(default)]
    pub queue: Vec<Value>,
}

// --- Characters ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMoving {
    pub character_id: i64,
    pub from_position: Position,
    pub to_position: Position,
    pub movement_state: MovementState,
    pub estimated_arrival: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterStopped {
    pub character_id: i64,
    pub final_position: Position,
    pub reason: StopReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMoved {
    pub character_id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterStatsUpdated {
    pub character_id: String,
    #[serde(default)]
    pub stats: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterHealthChanged {
    pub character_id: String,
    pub health: i64,
    pub max_health: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterLevelUp {
    pub character_id: String,
    pub new_level: i64,
}

// --- Settlements ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResourceUpdated {
    pub settlement_id: String,
    pub resource_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBuildingCompleted {
    pub settlement_id: String,
    pub building_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementPopulationChanged {
    pub settlement_id: String,
    pub population: i64,
}

// --- Military ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilitaryOrderCreated {
    pub order_id: String,
    #[serde(default)]
    pub order: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilitaryOrderStatusChanged {
    pub order_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilitaryOrderCompleted {
    pub order_id: String,
    #[serde(default)]
    pub result: Value,
}

// --- Combat ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatStarted {
    pub combat_id: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatRoundComplete {
    pub combat_id: String,
    pub round: i64,
    #[serde(default)]
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatEnded {
    pub combat_id: String,
    pub winner: String,
    #[serde(default)]
    pub loot: Vec<Value>,
}

// --- World ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldTimeUpdate {
    pub current_time: DateTime<Utc>,
    pub time_scale: f64,
    pub day_night_cycle: DayNightCycle,
}

/// World clock tick as sent by the world hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldTimeUpdated {
    pub world_id: String,
    pub game_time: String,
    pub tick: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldWeatherChanged {
    pub world_id: String,
    pub weather: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldEvent {
    pub event_id: String,
    pub event_type: WorldEventType,
    pub location: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_id: Option<i64>,
    #[serde(default)]
    pub participant_ids: Vec<i64>,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    /// Seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

// --- Social ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub channel: ChatScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<i64>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Direct message between players.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceived {
    pub from: String,
    pub to: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyInvite {
    pub party_id: String,
    pub inviter_id: String,
    pub invited_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyMemberJoined {
    pub party_id: String,
    pub character_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyMemberLeft {
    pub party_id: String,
    pub character_id: String,
}

// --- Crafting ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftingStarted {
    pub character_id: String,
    pub recipe_id: String,
    pub queue_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftingCompleted {
    pub character_id: String,
    pub queue_id: String,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftingFailed {
    pub character_id: String,
    pub queue_id: String,
    pub reason: String,
}

// --- Market ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketListingCreated {
    pub listing_id: String,
    #[serde(default)]
    pub item: Value,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketListingSold {
    pub listing_id: String,
    pub buyer: String,
    pub seller: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPriceUpdated {
    pub item_id: String,
    pub new_price: f64,
    pub change: f64,
}

// --- Lifecycle (client-side only) ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disconnected {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reconnecting {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconnected {
    pub connection_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_character_moving_invocation() {
        let event = HubEvent::from_invocation(
            "CharacterMoving",
            vec![json!({
                "characterId": 42,
                "fromPosition": { "x": 1.0, "y": 2.0, "z": 0.0 },
                "toPosition": { "x": 5.0, "y": 2.0, "z": 0.0 },
                "movementState": "Moving",
                "estimatedArrival": "2025-03-01T12:00:00Z"
            })],
        )
        .unwrap();

        assert_eq!(event.kind(), EventKind::CharacterMoving);
        let moving = CharacterMoving::from_event(&event).unwrap();
        assert_eq!(moving.character_id, 42);
        assert_eq!(moving.to_position.x, 5.0);
        assert_eq!(moving.movement_state, MovementState::Moving);
        assert!(CharacterStopped::from_event(&event).is_none());
    }

    #[test]
    fn stop_reason_keeps_server_spelling() {
        let event = HubEvent::from_invocation(
            "CharacterStopped",
            vec![json!({
                "characterId": 7,
                "finalPosition": { "x": 0.0, "y": 0.0, "z": 0.0 },
                "reason": "AITookControl"
            })],
        )
        .unwrap();
        let stopped = CharacterStopped::from_event(&event).unwrap();
        assert_eq!(stopped.reason, StopReason::AiTookControl);
    }

    #[test]
    fn unknown_target_is_rejected() {
        let err = HubEvent::from_invocation("TotallyNew", vec![json!({})]).unwrap_err();
        assert_eq!(err, EventDecodeError::UnknownTarget("TotallyNew".into()));
    }

    #[test]
    fn lifecycle_names_cannot_come_from_the_server() {
        let err = HubEvent::from_invocation("Connected", vec![json!({ "connectionId": "x" })])
            .unwrap_err();
        assert_eq!(err, EventDecodeError::Reserved(EventKind::Connected));
    }

    #[test]
    fn malformed_payload_reports_kind() {
        let err = HubEvent::from_invocation("CharacterLevelUp", vec![json!({ "characterId": "c1" })])
            .unwrap_err();
        assert!(matches!(
            err,
            EventDecodeError::Malformed { kind: EventKind::CharacterLevelUp, .. }
        ));
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(*kind));
        }
        assert_eq!(EventKind::ALL.iter().filter(|k| k.is_lifecycle()).count(), 4);
    }

    #[test]
    fn reconnecting_payload_is_an_empty_object() {
        let event = Reconnecting {}.into_event();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({ "event": "Reconnecting", "data": {} }));
    }
}
