//! Value types shared by several event payloads.

use serde::{Deserialize, Serialize};

/// World-space position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementState {
    Idle,
    Moving,
    Following,
    Patrolling,
    Fleeing,
    Returning,
}

/// Why a character stopped moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    PlayerStopped,
    ReachedDestination,
    Interrupted,
    #[serde(rename = "AITookControl")]
    AiTookControl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DayPhase {
    Dawn,
    Day,
    Dusk,
    Night,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayNightCycle {
    pub is_daytime: bool,
    pub sun_position: f64,
    pub phase: DayPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldEventType {
    Battle,
    Trade,
    Construction,
    Discovery,
    Natural,
}

/// Audience of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatScope {
    Global,
    Settlement,
    Faction,
    Private,
}
