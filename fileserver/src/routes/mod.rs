pub mod client;
pub mod internal;

use std::sync::Arc;

use rocket::{Build, Rocket};

use crate::server::FileServer;

pub fn rocket(config: rocket::Config, server: Arc<FileServer>) -> Rocket<Build> {
    rocket::custom(config).manage(server).mount(
        "/",
        rocket::routes![
            client::send_chunk,
            client::receive_chunk,
            internal::expect,
            internal::cancel_token,
            internal::purge,
            internal::probe,
            internal::replicate,
        ],
    )
}
