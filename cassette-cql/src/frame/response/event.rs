//! `EVENT` frames pushed by the server on stream -1.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::frame::frame_errors::CqlEventParseError;
use crate::frame::types;

/// Kinds of events a connection can REGISTER for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    TopologyChange,
    StatusChange,
    SchemaChange,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::TopologyChange,
        EventType::StatusChange,
        EventType::SchemaChange,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TopologyChange => "TOPOLOGY_CHANGE",
            EventType::StatusChange => "STATUS_CHANGE",
            EventType::SchemaChange => "SCHEMA_CHANGE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = CqlEventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CqlEventParseError::UnknownEventType(s.to_owned()))
    }
}

/// A cluster change pushed to connections that registered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TopologyChange(TopologyChangeEvent),
    StatusChange(StatusChangeEvent),
    SchemaChange(SchemaChangeEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChangeEvent {
    NewNode(SocketAddr),
    RemovedNode(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChangeEvent {
    Up(SocketAddr),
    Down(SocketAddr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

impl FromStr for SchemaChangeType {
    type Err = CqlEventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "UPDATED" => Ok(Self::Updated),
            "DROPPED" => Ok(Self::Dropped),
            _ => Err(CqlEventParseError::UnknownChangeType(s.to_string())),
        }
    }
}

/// A schema change. The table name is empty when a whole keyspace changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChangeEvent {
    pub change_type: SchemaChangeType,
    pub keyspace_name: String,
    pub table_name: String,
}

impl Event {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, CqlEventParseError> {
        let event_type: EventType = types::read_string(buf)
            .map_err(CqlEventParseError::EventTypeParseError)?
            .parse()?;
        let change = types::read_string(buf).map_err(CqlEventParseError::ChangeTypeParseError)?;

        match event_type {
            EventType::TopologyChange => {
                let addr = read_node_address(buf)?;
                match change {
                    "NEW_NODE" => Ok(Self::TopologyChange(TopologyChangeEvent::NewNode(addr))),
                    "REMOVED_NODE" => Ok(Self::TopologyChange(TopologyChangeEvent::RemovedNode(
                        addr,
                    ))),
                    _ => Err(CqlEventParseError::UnknownChangeType(change.to_string())),
                }
            }
            EventType::StatusChange => {
                let addr = read_node_address(buf)?;
                match change {
                    "UP" => Ok(Self::StatusChange(StatusChangeEvent::Up(addr))),
                    "DOWN" => Ok(Self::StatusChange(StatusChangeEvent::Down(addr))),
                    _ => Err(CqlEventParseError::UnknownChangeType(change.to_string())),
                }
            }
            EventType::SchemaChange => {
                let change_type = change.parse()?;
                let keyspace_name = types::read_string(buf)
                    .map_err(CqlEventParseError::SchemaChangeTargetParseError)?
                    .to_owned();
                let table_name = types::read_string(buf)
                    .map_err(CqlEventParseError::SchemaChangeTargetParseError)?
                    .to_owned();
                Ok(Self::SchemaChange(SchemaChangeEvent {
                    change_type,
                    keyspace_name,
                    table_name,
                }))
            }
        }
    }
}

fn read_node_address(buf: &mut &[u8]) -> Result<SocketAddr, CqlEventParseError> {
    types::read_inet(buf).map_err(CqlEventParseError::NodeAddressParseError)
}
