use cdc_core::Lsn;

use crate::error::{StateError, StateResult};

const CONFIRMED_LSN_KEY: &str = "replication_state.confirmed_lsn";
const LAST_ACTIVE_KEY: &str = "last_active_timestamp";
const ALARM_KEY: &str = "alarm_at";

/// A small keyed store backing the controller's durable bookkeeping:
/// `replication_state`, `last_active_timestamp`, and a `setAlarm` side-channel
/// for scheduling the hibernation wake.
///
/// On cold start a missing key yields the documented defaults rather than an
/// error (`confirmed_lsn = "0/0"`, no alarm pending).
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> StateResult<Option<String>>;
    fn put(&self, key: &str, value: &str) -> StateResult<()>;

    /// `confirmed_lsn` is only meant to be written once the corresponding
    /// `TableChange`s have been durably stored; callers are responsible for
    /// that ordering, not this trait.
    fn get_confirmed_lsn(&self) -> StateResult<Lsn> {
        match self.get(CONFIRMED_LSN_KEY)? {
            Some(v) => Lsn::parse(&v).map_err(|e| StateError::Serialization(e.to_string())),
            None => Ok(Lsn::ZERO),
        }
    }

    fn set_confirmed_lsn(&self, lsn: Lsn) -> StateResult<()> {
        self.put(CONFIRMED_LSN_KEY, &lsn.format())
    }

    fn get_last_active_timestamp(&self) -> StateResult<Option<i64>> {
        self.get(LAST_ACTIVE_KEY)?
            .map(|v| {
                v.parse::<i64>()
                    .map_err(|e| StateError::Serialization(e.to_string()))
            })
            .transpose()
    }

    fn set_last_active_timestamp(&self, millis: i64) -> StateResult<()> {
        self.put(LAST_ACTIVE_KEY, &millis.to_string())
    }

    /// Schedule (or clear, with `None`) a future wake for the hibernating controller.
    fn set_alarm(&self, at_millis: Option<i64>) -> StateResult<()> {
        match at_millis {
            Some(millis) => self.put(ALARM_KEY, &millis.to_string()),
            None => self.put(ALARM_KEY, ""),
        }
    }

    fn get_alarm(&self) -> StateResult<Option<i64>> {
        match self.get(ALARM_KEY)? {
            Some(v) if !v.is_empty() => Ok(Some(
                v.parse::<i64>()
                    .map_err(|e| StateError::Serialization(e.to_string()))?,
            )),
            _ => Ok(None),
        }
    }
}
