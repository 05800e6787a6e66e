//! Wire types and framing for the worker request/reply protocol.
//!
//! One request carries one island for one time-step; the reply carries the
//! updated kinematic state and the contacts the solver resolved. Frames are a
//! 4-byte little-endian length prefix followed by a JSON body. Unknown fields
//! are ignored on decode, so either side can grow the schema without breaking
//! the other.

use glam::{DQuat, DVec3};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::body::{BodyId, RigidBody};
use crate::error::{SimError, SimResult};

/// Upper bound on a single frame; anything larger is a protocol error.
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Aggregated external force and torque for one body, valid for one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalForce {
    pub id: BodyId,
    pub force: DVec3,
    pub torque: DVec3,
}

/// Full state of one body as shipped to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodySnapshot {
    pub id: BodyId,
    /// Store version the snapshot was taken at; echoed in the reply and used
    /// as the CAS baseline at merge time.
    pub version: u64,
    /// Read-only partners collide but are never written back.
    #[serde(default)]
    pub read_only: bool,
    pub body: RigidBody,
}

/// One island, one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Island index within the tick, for logging and reply routing.
    pub island: u64,
    /// Tick nonce; replies carrying a stale nonce are discarded.
    pub nonce: u64,
    /// Step length in seconds.
    pub dt: f64,
    /// Fixed number of internal sub-steps (`dt / max_substeps` each).
    pub max_substeps: u32,
    pub bodies: Vec<BodySnapshot>,
    #[serde(default)]
    pub external: Vec<ExternalForce>,
}

/// Updated kinematic state of one body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyUpdate {
    pub id: BodyId,
    /// Echo of the request version for traceability; reconciliation uses it
    /// as the expected CAS version.
    pub version: u64,
    pub position: DVec3,
    pub orientation: DQuat,
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,
}

/// A resolved contact between two bodies, `a < b`. Transient: valid for the
/// tick it was produced in and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactPair {
    pub a: BodyId,
    pub b: BodyId,
    /// Contact point on the surface of `a`, world coordinates.
    pub point_on_a: DVec3,
    /// Contact point on the surface of `b`, world coordinates.
    pub point_on_b: DVec3,
    /// Contact normal on `b`, pointing towards `a`.
    pub normal_on_b: DVec3,
}

/// Worker answer for one island.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    pub island: u64,
    pub nonce: u64,
    pub bodies: Vec<BodyUpdate>,
    #[serde(default)]
    pub contacts: Vec<ContactPair>,
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> SimResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value).map_err(|e| SimError::Protocol(e.to_string()))?;
    if payload.len() > MAX_FRAME {
        return Err(SimError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub async fn read_frame<R, T>(reader: &mut R) -> SimResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME {
        return Err(SimError::Protocol(format!(
            "announced frame of {len} bytes exceeds limit"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    serde_json::from_slice(&payload).map_err(|e| SimError::Protocol(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> WorkerRequest {
        WorkerRequest {
            island: 3,
            nonce: 42,
            dt: 0.05,
            max_substeps: 10,
            bodies: vec![BodySnapshot {
                id: BodyId(1),
                version: 7,
                read_only: false,
                body: RigidBody::default(),
            }],
            external: vec![ExternalForce {
                id: BodyId(1),
                force: DVec3::X,
                torque: DVec3::ZERO,
            }],
        }
    }

    #[tokio::test]
    async fn frames_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(64 * 1024);
        write_frame(&mut a, &request()).await.unwrap();
        let decoded: WorkerRequest = read_frame(&mut b).await.unwrap();
        assert_eq!(decoded.island, 3);
        assert_eq!(decoded.nonce, 42);
        assert_eq!(decoded.bodies[0].id, BodyId(1));
        assert_eq!(decoded.external[0].force, DVec3::X);
    }

    #[tokio::test]
    async fn unknown_fields_are_ignored() {
        let json = br#"{"island":1,"nonce":2,"bodies":[],"contacts":[],"future_field":true}"#;
        let (mut a, mut b) = tokio::io::duplex(4096);
        a.write_all(&(json.len() as u32).to_le_bytes()).await.unwrap();
        a.write_all(json).await.unwrap();
        let decoded: WorkerReply = read_frame(&mut b).await.unwrap();
        assert_eq!(decoded.island, 1);
        assert!(decoded.contacts.is_empty());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let len = (MAX_FRAME as u32 + 1).to_le_bytes();
        a.write_all(&len).await.unwrap();
        let err = read_frame::<_, WorkerReply>(&mut b).await.unwrap_err();
        assert!(matches!(err, SimError::Protocol(_)));
    }

    #[test]
    fn quaternions_serialize_as_xyzw_arrays() {
        let update = BodyUpdate {
            id: BodyId(1),
            version: 1,
            position: DVec3::ZERO,
            orientation: DQuat::from_xyzw(0.0, 0.0, 0.0, 1.0),
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["orientation"], serde_json::json!([0.0, 0.0, 0.0, 1.0]));
    }
}
