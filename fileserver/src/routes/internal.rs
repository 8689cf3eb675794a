use std::net::IpAddr;
use std::sync::Arc;

use rocket::{
    get,
    http::Status,
    post,
    request::{self, FromRequest, Outcome},
    serde::json::Json,
    Request, State,
};
use utilities::logger::info;

use crate::expectation::ExpectAction;
use crate::server::{FileServer, ProbeInfo};

/// Peer gate for the namenode-only surface. Until the first probe binds an
/// identity the surface is open; afterwards only the probed address passes.
pub struct NsPeer(pub IpAddr);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for NsPeer {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(server) = req.rocket().state::<Arc<FileServer>>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let Some(remote) = req.remote() else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        if server.ns().is_ns(remote.ip()) {
            Outcome::Success(NsPeer(remote.ip()))
        } else {
            Outcome::Error((Status::Unauthorized, ()))
        }
    }
}

/// Test hook: a `mock: mock` header makes the expect endpoint behave as if
/// the listed chunks had already been received.
pub struct MockHeader(bool);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MockHeader {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        Outcome::Success(MockHeader(req.headers().get_one("mock") == Some("mock")))
    }
}

#[post("/expect/<token>?<action>", data = "<body>")]
pub async fn expect(
    _peer: NsPeer,
    server: &State<Arc<FileServer>>,
    token: &str,
    action: Option<&str>,
    mock: MockHeader,
    body: String,
) -> (Status, String) {
    let Some(action) = action.and_then(ExpectAction::from_query) else {
        return (Status::BadRequest, "Not correct action".to_owned());
    };
    let chunks: Vec<String> = match serde_json::from_str(&body) {
        Ok(chunks) => chunks,
        Err(e) => return (Status::BadRequest, e.to_string()),
    };

    if mock.0 {
        for id in &chunks {
            server.ns().received_chunk(id).await;
        }
    }

    match server.expect(token, action, &chunks).await {
        Ok(()) => {
            info!(%token, ?chunks, "registered expectation batch");
            (Status::Ok, String::new())
        }
        Err(e) => (Status::Forbidden, e.to_string()),
    }
}

#[get("/cancelToken?<token>")]
pub async fn cancel_token(
    _peer: NsPeer,
    server: &State<Arc<FileServer>>,
    token: Option<&str>,
) -> Status {
    match token {
        Some(token) if !token.is_empty() => {
            server.cancel_token(token);
            Status::Ok
        }
        _ => Status::BadRequest,
    }
}

#[post("/purge", data = "<body>")]
pub async fn purge(_peer: NsPeer, server: &State<Arc<FileServer>>, body: String) -> Status {
    match serde_json::from_str::<Vec<String>>(&body) {
        Ok(chunks) => {
            server.purge(chunks);
            Status::Ok
        }
        Err(_) => Status::BadRequest,
    }
}

#[get("/probe")]
pub async fn probe(peer: NsPeer, server: &State<Arc<FileServer>>) -> Json<ProbeInfo> {
    info!(peer = %peer.0, "Probed");
    server.ns().set_ns_addr(peer.0).await;
    Json(server.probe_info().await)
}

#[post("/replicate?<token>&<addr>", data = "<body>")]
pub async fn replicate(
    _peer: NsPeer,
    server: &State<Arc<FileServer>>,
    token: Option<&str>,
    addr: Option<&str>,
    body: String,
) -> Status {
    let (Some(token), Some(addr)) = (token, addr) else {
        return Status::BadRequest;
    };
    let chunks: Vec<String> = match serde_json::from_str(&body) {
        Ok(chunks) => chunks,
        Err(_) => return Status::BadRequest,
    };
    server.replicate_to_peer(token, addr, &chunks).await;
    Status::Ok
}
