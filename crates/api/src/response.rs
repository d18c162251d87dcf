//! Response envelope for JSON endpoints.

use serde::Serialize;

/// `{ "data": T }` envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
