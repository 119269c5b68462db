use failure::{bail, format_err};

use crate::proto::{Request, Response, ZkError};
use crate::{error, MultiResponse, Stat};

pub(crate) fn create(
    res: Result<Response, ZkError>,
) -> Result<Result<String, error::Create>, failure::Error> {
    match res {
        Ok(Response::String(s)) => Ok(Ok(s)),
        Ok(r) => bail!("got non-string response to create: {:?}", r),
        Err(ZkError::NoNode) => Ok(Err(error::Create::NoParent)),
        Err(ZkError::NodeExists) => Ok(Err(error::Create::NodeExists)),
        Err(ZkError::NoChildrenForEphemerals) => Ok(Err(error::Create::NoChildrenForEphemerals)),
        Err(ZkError::BadArguments) => Ok(Err(error::Create::BadArguments)),
        Err(ZkError::SessionExpired) => Ok(Err(error::Create::SessionExpired)),
        Err(e) => Err(format_err!("create call failed: {:?}", e)),
    }
}

pub(crate) fn set_data(
    version: i32,
    res: Result<Response, ZkError>,
) -> Result<Result<Stat, error::SetData>, failure::Error> {
    match res {
        Ok(Response::Stat(stat)) => Ok(Ok(stat)),
        Ok(r) => bail!("got a non-stat response to a set_data request: {:?}", r),
        Err(ZkError::NoNode) => Ok(Err(error::SetData::NoNode)),
        Err(ZkError::BadVersion) => Ok(Err(error::SetData::VersionMismatch { expected: version })),
        Err(ZkError::BadArguments) => Ok(Err(error::SetData::BadArguments)),
        Err(e) => bail!("set_data call failed: {:?}", e),
    }
}

pub(crate) fn delete(
    version: i32,
    res: Result<Response, ZkError>,
) -> Result<Result<(), error::Delete>, failure::Error> {
    match res {
        Ok(Response::Empty) => Ok(Ok(())),
        Ok(r) => bail!("got non-empty response to delete: {:?}", r),
        Err(ZkError::NoNode) => Ok(Err(error::Delete::NoNode)),
        Err(ZkError::NotEmpty) => Ok(Err(error::Delete::NotEmpty)),
        Err(ZkError::BadVersion) => Ok(Err(error::Delete::VersionMismatch { expected: version })),
        Err(ZkError::BadArguments) => Ok(Err(error::Delete::BadArguments)),
        Err(e) => Err(format_err!("delete call failed: {:?}", e)),
    }
}

pub(crate) fn check(
    version: i32,
    res: Result<Response, ZkError>,
) -> Result<Result<(), error::Check>, failure::Error> {
    match res {
        Ok(Response::Empty) => Ok(Ok(())),
        Ok(r) => bail!("got a non-check response to a check request: {:?}", r),
        Err(ZkError::NoNode) => Ok(Err(error::Check::NoNode)),
        Err(ZkError::BadVersion) => Ok(Err(error::Check::VersionMismatch { expected: version })),
        Err(ZkError::BadArguments) => Ok(Err(error::Check::BadArguments)),
        Err(e) => bail!("check call failed: {:?}", e),
    }
}

pub(crate) fn create_session(res: Result<Response, ZkError>) -> Result<i64, failure::Error> {
    match res {
        Ok(Response::Session { session_id }) => Ok(session_id),
        Ok(r) => bail!("got a non-session response to create_session: {:?}", r),
        Err(e) => bail!("create_session call failed: {:?}", e),
    }
}

pub(crate) fn close_session(
    res: Result<Response, ZkError>,
) -> Result<Result<(), error::CloseSession>, failure::Error> {
    match res {
        Ok(Response::Empty) => Ok(Ok(())),
        Ok(r) => bail!("got non-empty response to close_session: {:?}", r),
        Err(ZkError::SessionExpired) => Ok(Err(error::CloseSession::SessionExpired)),
        Err(e) => Err(format_err!("close_session call failed: {:?}", e)),
    }
}

/// The part of a multi member needed to interpret its result.
///
/// Only the expected versions are kept, so the requests themselves can be handed over to the
/// log without cloning them.
#[derive(Debug)]
pub(crate) enum RequestMarker {
    Create,
    SetData { version: i32 },
    Delete { version: i32 },
    Check { version: i32 },
    /// A member the applier refuses inside a batch (sessions, nested batches).
    Other,
}

impl From<&Request> for RequestMarker {
    fn from(r: &Request) -> RequestMarker {
        match r {
            Request::Create { .. } => RequestMarker::Create,
            Request::SetData { version, .. } => RequestMarker::SetData { version: *version },
            Request::Delete { version, .. } => RequestMarker::Delete { version: *version },
            Request::Check { version, .. } => RequestMarker::Check { version: *version },
            Request::Multi(_) | Request::CreateSession { .. } | Request::CloseSession => {
                RequestMarker::Other
            }
        }
    }
}

pub(crate) fn multi(
    req: &RequestMarker,
    res: Result<Response, ZkError>,
) -> Result<Result<MultiResponse, error::Multi>, failure::Error> {
    // A failed batch reports `Ok` for members that had succeeded before being rolled back, and
    // `RuntimeInconsistency` for members that were never attempted.
    match res {
        Err(ZkError::Ok) => return Ok(Err(error::Multi::RolledBack)),
        Err(ZkError::RuntimeInconsistency) => return Ok(Err(error::Multi::Skipped)),
        _ => (),
    };

    Ok(match req {
        RequestMarker::Create => create(res)?
            .map(MultiResponse::Create)
            .map_err(|err| err.into()),
        RequestMarker::SetData { version } => set_data(*version, res)?
            .map(MultiResponse::SetData)
            .map_err(|err| err.into()),
        RequestMarker::Delete { version } => delete(*version, res)?
            .map(|_| MultiResponse::Delete)
            .map_err(|err| err.into()),
        RequestMarker::Check { version } => check(*version, res)?
            .map(|_| MultiResponse::Check)
            .map_err(|err| err.into()),
        RequestMarker::Other => bail!("request cannot be part of a multi batch: {:?}", res),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parent_is_no_parent() {
        assert_eq!(
            create(Err(ZkError::NoNode)).unwrap(),
            Err(error::Create::NoParent)
        );
    }

    #[test]
    fn version_mismatch_reports_expected() {
        assert_eq!(
            set_data(3, Err(ZkError::BadVersion)).unwrap(),
            Err(error::SetData::VersionMismatch { expected: 3 })
        );
        assert_eq!(
            delete(7, Err(ZkError::BadVersion)).unwrap(),
            Err(error::Delete::VersionMismatch { expected: 7 })
        );
    }

    #[test]
    fn multi_member_outcomes() {
        let marker = RequestMarker::Delete { version: -1 };
        assert_eq!(
            multi(&marker, Err(ZkError::Ok)).unwrap(),
            Err(error::Multi::RolledBack)
        );
        assert_eq!(
            multi(&marker, Err(ZkError::RuntimeInconsistency)).unwrap(),
            Err(error::Multi::Skipped)
        );
        assert_eq!(
            multi(&marker, Err(ZkError::NoNode)).unwrap(),
            Err(error::Multi::Delete(error::Delete::NoNode))
        );
        assert_eq!(
            multi(&RequestMarker::Create, Ok(Response::String("/x".into()))).unwrap(),
            Ok(MultiResponse::Create("/x".into()))
        );
    }

    #[test]
    fn unexpected_codes_are_infrastructure_errors() {
        assert!(create(Err(ZkError::MarshallingError)).is_err());
        assert!(check(1, Ok(Response::String("/x".into()))).is_err());
    }
}
