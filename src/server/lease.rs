//! Lease service.
//!
//! Leases are recorded on entries but never expire. Grants echo the TTL back
//! as the lease id, and keep-alives are refused.

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

use super::convert::header;
use super::KvBridge;
use crate::proto::etcdserverpb::lease_server::Lease;
use crate::proto::etcdserverpb::{
    LeaseGrantRequest, LeaseGrantResponse, LeaseKeepAliveRequest, LeaseKeepAliveResponse,
    LeaseLeasesRequest, LeaseLeasesResponse, LeaseRevokeRequest, LeaseRevokeResponse,
    LeaseTimeToLiveRequest, LeaseTimeToLiveResponse,
};

/// TTL reported for every lease.
pub const LEASE_TTL_SECS: i64 = 86500;

#[tonic::async_trait]
impl Lease for KvBridge {
    type LeaseKeepAliveStream = ReceiverStream<Result<LeaseKeepAliveResponse, Status>>;

    async fn lease_grant(
        &self,
        request: Request<LeaseGrantRequest>,
    ) -> Result<Response<LeaseGrantResponse>, Status> {
        let ttl = request.into_inner().ttl;
        let revision = self.backend.current_revision().await?;
        debug!(ttl, "lease granted");
        Ok(Response::new(LeaseGrantResponse {
            header: header(revision),
            id: ttl,
            ttl,
            error: String::new(),
        }))
    }

    async fn lease_revoke(
        &self,
        _request: Request<LeaseRevokeRequest>,
    ) -> Result<Response<LeaseRevokeResponse>, Status> {
        let revision = self.backend.current_revision().await?;
        Ok(Response::new(LeaseRevokeResponse {
            header: header(revision),
        }))
    }

    async fn lease_keep_alive(
        &self,
        _request: Request<Streaming<LeaseKeepAliveRequest>>,
    ) -> Result<Response<Self::LeaseKeepAliveStream>, Status> {
        Err(Status::unimplemented("lease keep alive is not supported"))
    }

    async fn lease_time_to_live(
        &self,
        request: Request<LeaseTimeToLiveRequest>,
    ) -> Result<Response<LeaseTimeToLiveResponse>, Status> {
        let id = request.into_inner().id;
        let revision = self.backend.current_revision().await?;
        Ok(Response::new(LeaseTimeToLiveResponse {
            header: header(revision),
            id,
            ttl: LEASE_TTL_SECS,
            granted_ttl: LEASE_TTL_SECS,
            keys: Vec::new(),
        }))
    }

    async fn lease_leases(
        &self,
        _request: Request<LeaseLeasesRequest>,
    ) -> Result<Response<LeaseLeasesResponse>, Status> {
        let revision = self.backend.current_revision().await?;
        Ok(Response::new(LeaseLeasesResponse {
            header: header(revision),
            leases: Vec::new(),
        }))
    }
}
