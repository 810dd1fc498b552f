//! Shared query-shaping helpers used by both [`crate::pool::Pool`] and
//! [`crate::transaction::Transaction`] so the five §6 operations
//! (`execute`/`query`/`query_single`/`query_json`/`query_single_json`) are
//! defined once and reused from both call sites.

use std::any::{Any, TypeId};

use bytes::Bytes;

use crate::errors::Error;
use crate::flow::QueryResult;
use crate::protocol::{Cardinality, IoFormat, Language};

/// Downcasts every row of a completed query into `T`, per the out-binding
/// contract: a decoder mismatch is a defect, not a recoverable condition.
pub(crate) fn downcast_rows<T: 'static>(result: QueryResult) -> Result<Vec<T>, Error> {
    result
        .rows
        .into_iter()
        .map(|row| {
            row.downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| Error::Interface("decoder produced a value of the wrong type"))
        })
        .collect()
}

/// Per §4.5.4: `AtMostOne` with zero rows is signalled by the engine as
/// `Error::NoData` rather than an empty `QueryResult`, so the "optional
/// unset" mapping has to intercept it before `?` would propagate it as a
/// hard error.
pub(crate) fn single_or_none<T: 'static>(result: Result<QueryResult, Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(result) => downcast_rows::<T>(result).map(|mut rows| rows.pop()),
        Err(Error::NoData) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Shape for a plain `execute` (§6): no output binding, `Many`/`Null`
/// cardinality, result discarded.
pub(crate) fn execute_shape(command: &str, args: &dyn Any, in_transaction: bool) -> crate::flow::Query<'_> {
    crate::flow::Query {
        command,
        format: IoFormat::Null,
        expected_cardinality: Cardinality::Many,
        language: Language::EdgeQL,
        args,
        user_output_type: TypeId::of::<()>(),
        in_transaction,
        state: &(),
    }
}

pub(crate) fn query_shape<'a, T: 'static>(
    command: &'a str,
    args: &'a dyn Any,
    in_transaction: bool,
) -> crate::flow::Query<'a> {
    crate::flow::Query {
        command,
        format: IoFormat::Binary,
        expected_cardinality: Cardinality::Many,
        language: Language::EdgeQL,
        args,
        user_output_type: TypeId::of::<T>(),
        in_transaction,
        state: &(),
    }
}

pub(crate) fn query_single_shape<'a, T: 'static>(
    command: &'a str,
    args: &'a dyn Any,
    in_transaction: bool,
) -> crate::flow::Query<'a> {
    crate::flow::Query {
        command,
        format: IoFormat::Binary,
        expected_cardinality: Cardinality::AtMostOne,
        language: Language::EdgeQL,
        args,
        user_output_type: TypeId::of::<T>(),
        in_transaction,
        state: &(),
    }
}

pub(crate) fn query_json_shape<'a>(command: &'a str, args: &'a dyn Any, in_transaction: bool) -> crate::flow::Query<'a> {
    crate::flow::Query {
        command,
        format: IoFormat::Json,
        expected_cardinality: Cardinality::Many,
        language: Language::EdgeQL,
        args,
        user_output_type: TypeId::of::<Bytes>(),
        in_transaction,
        state: &(),
    }
}

pub(crate) fn query_single_json_shape<'a>(
    command: &'a str,
    args: &'a dyn Any,
    in_transaction: bool,
) -> crate::flow::Query<'a> {
    crate::flow::Query {
        command,
        format: IoFormat::Json,
        expected_cardinality: Cardinality::AtMostOne,
        language: Language::EdgeQL,
        args,
        user_output_type: TypeId::of::<Bytes>(),
        in_transaction,
        state: &(),
    }
}
