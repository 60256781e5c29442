/// A response code.
///
/// Response codes follow the semantics of `HTTP` status codes.
pub type ResponseCode = u16;

/// The request completed successfully.
pub const OK: ResponseCode = 200;

/// The request has been accepted and is being processed.
pub const ACCEPTED: ResponseCode = 202;

/// The notification has been applied.
pub const CHANGED: ResponseCode = 204;

/// The request is not valid in the current device state.
pub const BAD_REQUEST: ResponseCode = 400;

/// The device failed while processing the request.
pub const INTERNAL_ERROR: ResponseCode = 500;

/// The device does not implement the requested operation.
pub const NOT_IMPLEMENTED: ResponseCode = 501;

/// Checks whether a response code denotes a success.
#[must_use]
pub const fn is_success(code: ResponseCode) -> bool {
    code == OK
}
