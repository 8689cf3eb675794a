use std::sync::Arc;

use rocket::{
    data::{Data, ToByteUnit},
    get,
    http::Status,
    post,
    response::stream::ReaderStream,
    State,
};
use tokio::io::AsyncRead;

use crate::server::{FileServer, ReadOutcome, WriteOutcome};

#[get("/chunks/<id>?<token>")]
pub async fn send_chunk(
    server: &State<Arc<FileServer>>,
    id: &str,
    token: Option<&str>,
) -> Result<ReaderStream![Box<dyn AsyncRead + Send + Unpin>], Status> {
    match server.open_chunk(token.unwrap_or_default(), id).await {
        ReadOutcome::Stream(reader) => Ok(ReaderStream::one(reader)),
        ReadOutcome::Unauthorized => Err(Status::Unauthorized),
        ReadOutcome::NotFound => Err(Status::NotFound),
    }
}

#[post("/chunks/<id>?<token>", data = "<data>")]
pub async fn receive_chunk(
    server: &State<Arc<FileServer>>,
    id: &str,
    token: Option<&str>,
    data: Data<'_>,
) -> Status {
    let mut body = Box::pin(data.open(1.gibibytes()));
    match server
        .store_chunk(token.unwrap_or_default(), id, &mut body)
        .await
    {
        WriteOutcome::Stored => Status::Ok,
        WriteOutcome::Unauthorized => Status::Unauthorized,
        WriteOutcome::AlreadyExists => Status::Forbidden,
        WriteOutcome::Failed => Status::InternalServerError,
    }
}
