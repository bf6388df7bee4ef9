//! gRPC transport layer for idresolve.
//!
//! The service carries the identify request as JSON bytes and answers with
//! the HTTP-equivalent status code plus the JSON envelope, so any gateway
//! can relay it unchanged.

use serde_json::Value;
use tonic::{Request, Response, Status};

use crate::envelope::{self, Reply};
use crate::fragment::IdentifyRequest;
use crate::resolver::IdentityResolver;

pub mod proto {
    tonic::include_proto!("idresolve");
}

use proto::identity_service_server::{IdentityService, IdentityServiceServer};

/// Maximum size of a request JSON payload.
const MAX_REQUEST_JSON_BYTES: usize = 64 * 1024;

/// gRPC service implementation backed by an [`IdentityResolver`].
#[derive(Debug, Clone)]
pub struct IdentityServiceImpl {
    resolver: IdentityResolver,
}

impl IdentityServiceImpl {
    #[must_use]
    pub fn new(resolver: IdentityResolver) -> Self {
        Self { resolver }
    }

    #[must_use]
    pub fn into_server(self) -> IdentityServiceServer<Self> {
        IdentityServiceServer::new(self)
    }
}

fn invalid_argument(msg: impl Into<String>) -> Status {
    Status::invalid_argument(msg.into())
}

/// A decoded payload: either a request to resolve, or the 400 reply for a
/// well-formed JSON document of the wrong shape.
enum Decoded {
    Request(IdentifyRequest),
    Rejected(Reply),
}

fn parse_request(bytes: &[u8]) -> Result<Decoded, Status> {
    if bytes.is_empty() {
        return Err(invalid_argument("request_json is required"));
    }
    if bytes.len() > MAX_REQUEST_JSON_BYTES {
        return Err(invalid_argument("request_json exceeds maximum size"));
    }
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| invalid_argument(format!("invalid request JSON: {e}")))?;
    Ok(match IdentifyRequest::from_json(value) {
        Ok(request) => Decoded::Request(request),
        Err(err) => Decoded::Rejected(envelope::reply(Err(err.into()))),
    })
}

fn encode_reply(reply: &Reply) -> Result<proto::IdentifyReply, Status> {
    let body_json = serde_json::to_vec(&reply.body)
        .map_err(|e| Status::internal(format!("failed to serialize reply JSON: {e}")))?;
    Ok(proto::IdentifyReply {
        status: u32::from(reply.status.http_code()),
        body_json,
    })
}

#[tonic::async_trait]
impl IdentityService for IdentityServiceImpl {
    async fn identify(
        &self,
        request: Request<proto::IdentifyRequest>,
    ) -> Result<Response<proto::IdentifyReply>, Status> {
        let req = request.into_inner();
        let identify = match parse_request(&req.request_json)? {
            Decoded::Request(identify) => identify,
            Decoded::Rejected(reply) => return Ok(Response::new(encode_reply(&reply)?)),
        };

        let resolver = self.resolver.clone();
        let result = tokio::task::spawn_blocking(move || resolver.resolve(identify))
            .await
            .map_err(|e| Status::internal(format!("resolution task failed: {e}")))?;

        let reply = envelope::reply(result);
        Ok(Response::new(encode_reply(&reply)?))
    }
}
