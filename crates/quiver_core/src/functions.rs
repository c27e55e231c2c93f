//! Computed values for item precepts.
//!
//! A precept such as `updated_at=now(msec)` or `id=serial()` asks the
//! namespace to fill a field while the item is written. `now` has no side
//! effects; `serial` advances a per-field counter kept in namespace meta and
//! appends the resulting put-meta record to the caller's update batch, so
//! replicas converge on the same counter.

use crate::error::{CoreError, CoreResult};
use crate::item::Variant;
use crate::replication::UpdateBatch;
use std::time::{SystemTime, UNIX_EPOCH};

/// Meta key prefix of serial counters.
pub const SERIAL_META_PREFIX: &str = "_SERIAL_";

/// Returns the meta key holding the serial counter of `field`.
#[must_use]
pub fn serial_meta_key(field: &str) -> String {
    format!("{SERIAL_META_PREFIX}{field}")
}

/// A parsed precept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    /// Field receiving the value.
    pub field: String,
    /// Lower-cased function name.
    pub name: String,
    /// Arguments, trimmed and unquoted.
    pub args: Vec<String>,
}

impl FunctionCall {
    /// Parses `field=name(arg, ...)`.
    pub fn parse(precept: &str) -> CoreResult<Self> {
        let malformed = || CoreError::params(format!("malformed precept '{precept}'"));

        let (field, call) = precept.split_once('=').ok_or_else(malformed)?;
        let field = field.trim();
        let call = call.trim();
        let open = call.find('(').ok_or_else(malformed)?;
        if !call.ends_with(')') || field.is_empty() {
            return Err(malformed());
        }
        let name = call[..open].trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(malformed());
        }

        let inner = call[open + 1..call.len() - 1].trim();
        let args = if inner.is_empty() {
            Vec::new()
        } else {
            inner
                .split(',')
                .map(|a| a.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
                .collect()
        };

        Ok(Self {
            field: field.to_string(),
            name,
            args,
        })
    }

    /// Checks the function name and its arguments without evaluating it.
    pub fn validate(&self) -> CoreResult<()> {
        match self.name.as_str() {
            "now" => TimeUnit::parse(self.time_unit()).map(|_| ()),
            "serial" => Ok(()),
            other => Err(CoreError::params(format!("Unknown function '{other}'"))),
        }
    }

    fn time_unit(&self) -> &str {
        self.args
            .first()
            .map(String::as_str)
            .filter(|u| !u.is_empty())
            .unwrap_or("sec")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeUnit {
    Sec,
    Msec,
    Usec,
    Nsec,
}

impl TimeUnit {
    fn parse(unit: &str) -> CoreResult<Self> {
        match unit.to_ascii_lowercase().as_str() {
            "sec" => Ok(Self::Sec),
            "msec" => Ok(Self::Msec),
            "usec" => Ok(Self::Usec),
            "nsec" => Ok(Self::Nsec),
            _ => Err(CoreError::params(format!(
                "Unknown parameter '{unit}' in function now()"
            ))),
        }
    }
}

/// Source of serial counters, implemented by namespace state.
pub trait SerialSource {
    /// Advances the counter of `field`, persists it, and appends the
    /// put-meta record to `updates`. Returns the new value.
    fn next_serial(&mut self, field: &str, updates: &mut UpdateBatch) -> CoreResult<i64>;
}

/// Evaluates precepts against one namespace state and one update batch.
pub struct FunctionExecutor<'a, S: SerialSource + ?Sized> {
    source: &'a mut S,
    updates: &'a mut UpdateBatch,
}

impl<'a, S: SerialSource + ?Sized> FunctionExecutor<'a, S> {
    /// Creates an executor.
    pub fn new(source: &'a mut S, updates: &'a mut UpdateBatch) -> Self {
        Self { source, updates }
    }

    /// Computes the value of `call`.
    pub fn execute(&mut self, call: &FunctionCall) -> CoreResult<Variant> {
        match call.name.as_str() {
            "now" => now(call.time_unit()).map(Variant::Int),
            "serial" => self
                .source
                .next_serial(&call.field, self.updates)
                .map(Variant::Int),
            other => Err(CoreError::params(format!("Unknown function '{other}'"))),
        }
    }
}

/// Current Unix time in `unit` (`sec`, `msec`, `usec` or `nsec`).
pub fn now(unit: &str) -> CoreResult<i64> {
    let unit = TimeUnit::parse(unit)?;
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| CoreError::logic(format!("system clock before Unix epoch: {e}")))?;
    let value = match unit {
        TimeUnit::Sec => u128::from(elapsed.as_secs()),
        TimeUnit::Msec => elapsed.as_millis(),
        TimeUnit::Usec => elapsed.as_micros(),
        TimeUnit::Nsec => elapsed.as_nanos(),
    };
    i64::try_from(value).map_err(|_| CoreError::logic("time value out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::UpdateRecord;
    use crate::types::Lsn;
    use crate::wal::WalRecord;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MetaCounters(HashMap<String, i64>);

    impl SerialSource for MetaCounters {
        fn next_serial(&mut self, field: &str, updates: &mut UpdateBatch) -> CoreResult<i64> {
            let key = serial_meta_key(field);
            let counter = self.0.entry(key.clone()).or_insert(0);
            *counter += 1;
            updates.push(UpdateRecord::new(
                "ns",
                Lsn::EMPTY,
                Lsn::EMPTY,
                WalRecord::put_meta(key, counter.to_string()),
            ));
            Ok(*counter)
        }
    }

    #[test]
    fn parse_precepts() {
        let call = FunctionCall::parse("updated = NOW( msec )").unwrap();
        assert_eq!(call.field, "updated");
        assert_eq!(call.name, "now");
        assert_eq!(call.args, vec!["msec"]);

        let call = FunctionCall::parse("id=serial()").unwrap();
        assert!(call.args.is_empty());

        assert!(FunctionCall::parse("no_equals").is_err());
        assert!(FunctionCall::parse("f=now").is_err());
        assert!(FunctionCall::parse("=now()").is_err());
    }

    #[test]
    fn now_defaults_to_seconds() {
        let mut source = MetaCounters::default();
        let mut updates = UpdateBatch::new();
        let mut exec = FunctionExecutor::new(&mut source, &mut updates);

        let before = now("sec").unwrap();
        for precept in ["t=now()", "t=now('')"] {
            let v = exec.execute(&FunctionCall::parse(precept).unwrap()).unwrap();
            let secs = v.as_int().unwrap();
            assert!(secs >= before && secs <= before + 5);
        }
        let ms = exec
            .execute(&FunctionCall::parse("t=now(msec)").unwrap())
            .unwrap();
        assert!(ms.as_int().unwrap() >= before * 1000);
        drop(exec);
        assert!(updates.is_empty());
    }

    #[test]
    fn now_rejects_unknown_unit() {
        let err = now("fortnight").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Params);
    }

    #[test]
    fn serial_appends_put_meta() {
        let mut source = MetaCounters::default();
        let mut updates = UpdateBatch::new();
        let mut exec = FunctionExecutor::new(&mut source, &mut updates);
        let call = FunctionCall::parse("id=serial()").unwrap();

        assert_eq!(exec.execute(&call).unwrap(), Variant::Int(1));
        assert_eq!(exec.execute(&call).unwrap(), Variant::Int(2));
        drop(exec);

        let values: Vec<_> = updates
            .iter()
            .map(|u| u.record().clone())
            .collect();
        assert_eq!(
            values,
            vec![
                WalRecord::put_meta("_SERIAL_id", "1"),
                WalRecord::put_meta("_SERIAL_id", "2"),
            ]
        );
    }

    #[test]
    fn unknown_function() {
        let mut source = MetaCounters::default();
        let mut updates = UpdateBatch::new();
        let mut exec = FunctionExecutor::new(&mut source, &mut updates);
        let err = exec
            .execute(&FunctionCall::parse("x=uuid()").unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("Unknown function 'uuid'"));
    }

    #[test]
    fn validate_checks_arguments() {
        assert!(FunctionCall::parse("t=now()").unwrap().validate().is_ok());
        assert!(FunctionCall::parse("t=NOW(Usec)").unwrap().validate().is_ok());
        assert!(FunctionCall::parse("id=serial()").unwrap().validate().is_ok());

        let err = FunctionCall::parse("t=now(weeks)")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("'weeks'"));
        assert!(FunctionCall::parse("x=uuid()").unwrap().validate().is_err());
    }
}
