//! Lua scripts for conditional single-session updates.
//!
//! Each script touches keys belonging to one session only and runs
//! atomically inside Redis, so check-then-write races between hub instances
//! cannot interleave.
//!
//! Interval entries are JSON objects `{"joinedAt": ..., "leftAt": ...}` where
//! `leftAt` is omitted (never `null`) while the interval is open, so
//! `cjson.decode(entry)['leftAt'] == nil` identifies the open one.

/// Insert a session document if absent.
///
/// Arguments:
/// - KEYS[1]: Document key (`session:{id}`)
/// - KEYS[2]: Version key (`session:{id}:version`)
/// - KEYS[3]: Index set (`sessions:index`)
/// - ARGV[1]: Document JSON
/// - ARGV[2]: Session ID
///
/// Returns:
/// - 1: Inserted
/// - 0: Already exists
pub const INSERT_SESSION: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end

redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], 1)
redis.call('SADD', KEYS[3], ARGV[2])
return 1
"#;

/// Optimistic compare-and-set write of a session document.
///
/// Arguments:
/// - KEYS[1]: Version key (`session:{id}:version`)
/// - KEYS[2]: Document key (`session:{id}`)
/// - ARGV[1]: Expected version
/// - ARGV[2]: Document JSON
///
/// Returns:
/// - >0: New version (write completed)
/// - 0: Version mismatch (concurrent write)
/// - -1: Invalid version argument
/// - -2: Session does not exist
pub const VERSIONED_WRITE: &str = r#"
local expected = tonumber(ARGV[1])
if expected == nil then
    return -1
end

if redis.call('EXISTS', KEYS[2]) == 0 then
    return -2
end

local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current ~= expected then
    return 0
end

redis.call('SET', KEYS[2], ARGV[2])
return redis.call('INCR', KEYS[1])
"#;

/// Add a user to the participant set of an existing session.
///
/// Arguments:
/// - KEYS[1]: Document key (`session:{id}`)
/// - KEYS[2]: Participant set (`session:{id}:participants`)
/// - ARGV[1]: User ID
///
/// Returns:
/// - 1: Added
/// - 0: Already present
/// - -1: Session does not exist
pub const ADD_PARTICIPANT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end

return redis.call('SADD', KEYS[2], ARGV[1])
"#;

/// Append an open interval unless the last interval is still open.
///
/// Arguments:
/// - KEYS[1]: Document key (`session:{id}`)
/// - KEYS[2]: Interval list (`session:{id}:intervals:{user}`)
/// - KEYS[3]: Attendee set (`session:{id}:attendees`)
/// - ARGV[1]: User ID
/// - ARGV[2]: Open interval JSON
///
/// Returns:
/// - 1: Opened
/// - 0: An interval is already open (no-op)
/// - -1: Session does not exist
pub const OPEN_INTERVAL: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end

local last = redis.call('LINDEX', KEYS[2], -1)
if last then
    local interval = cjson.decode(last)
    if interval['leftAt'] == nil then
        return 0
    end
end

redis.call('RPUSH', KEYS[2], ARGV[2])
redis.call('SADD', KEYS[3], ARGV[1])
return 1
"#;

/// Close the open interval, if the last interval is open.
///
/// Arguments:
/// - KEYS[1]: Interval list (`session:{id}:intervals:{user}`)
/// - ARGV[1]: `leftAt` timestamp (RFC 3339)
///
/// Returns:
/// - Closed interval JSON
/// - nil: No open interval
pub const CLOSE_INTERVAL: &str = r#"
local last = redis.call('LINDEX', KEYS[1], -1)
if not last then
    return false
end

local interval = cjson.decode(last)
if interval['leftAt'] ~= nil then
    return false
end

interval['leftAt'] = ARGV[1]
local closed = cjson.encode(interval)
redis.call('LSET', KEYS[1], -1, closed)
return closed
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_are_not_empty() {
        for script in [
            INSERT_SESSION,
            VERSIONED_WRITE,
            ADD_PARTICIPANT,
            OPEN_INTERVAL,
            CLOSE_INTERVAL,
        ] {
            assert!(script.contains("redis.call"));
        }
    }

    #[test]
    fn test_interval_scripts_detect_open_by_missing_left_at() {
        assert!(OPEN_INTERVAL.contains("interval['leftAt'] == nil"));
        assert!(CLOSE_INTERVAL.contains("interval['leftAt'] ~= nil"));
    }

    #[test]
    fn test_versioned_write_increments_version() {
        assert!(VERSIONED_WRITE.contains("INCR"));
        assert!(VERSIONED_WRITE.contains("current ~= expected"));
    }
}
