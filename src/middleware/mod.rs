mod cache;
mod request_id;
mod sso;

pub use cache::cache_admission_middleware;
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
pub(crate) use sso::insert_login_message;
pub use sso::{LOGIN_MESSAGE_HEADER, removal_cookie, session_cookie, sso_auth_middleware};
