//! Maintenance service. Only Status is served.

use tonic::{Request, Response, Status};

use super::convert::header;
use super::{KvBridge, ETCD_VERSION};
use crate::proto::etcdserverpb::maintenance_server::Maintenance;
use crate::proto::etcdserverpb::{StatusRequest, StatusResponse};

#[tonic::async_trait]
impl Maintenance for KvBridge {
    async fn status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let revision = self.backend.current_revision().await?;
        let db_size = self.backend.db_size().await?;
        Ok(Response::new(StatusResponse {
            header: header(revision),
            version: ETCD_VERSION.to_string(),
            db_size,
            db_size_in_use: db_size,
            ..Default::default()
        }))
    }
}
