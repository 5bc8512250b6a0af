//! Lua scripts executed atomically by Redis.
//!
//! Redis runs a script to completion before serving any other command, so
//! each script is a critical section over its keys.

/// `KEYS[1]` capacity, `KEYS[2]` provisional, `ARGV[1]` quantity, `ARGV[2]` TTL in ms.
///
/// Returns `{status, available}` where status is `-1` unprimed, `0` rejected
/// and `1` admitted. `available` is the free capacity seen before admission.
pub const ADMIT: &str = r"
local capacity = redis.call('GET', KEYS[1])
if not capacity then
    return {-1, 0}
end
local provisional = tonumber(redis.call('GET', KEYS[2]) or '0')
local available = tonumber(capacity) - provisional
if available < 0 then
    available = 0
end
local quantity = tonumber(ARGV[1])
if available < quantity then
    return {0, available}
end
redis.call('INCRBY', KEYS[2], quantity)
redis.call('PEXPIRE', KEYS[2], ARGV[2])
return {1, available}
";

/// `KEYS[1]` provisional, `ARGV[1]` quantity. Floors at zero by deleting the key.
pub const RELEASE: &str = r"
local provisional = tonumber(redis.call('GET', KEYS[1]) or '0')
local quantity = tonumber(ARGV[1])
if provisional <= quantity then
    redis.call('DEL', KEYS[1])
    return 0
end
return redis.call('DECRBY', KEYS[1], quantity)
";

/// `KEYS[1]` capacity, `KEYS[2]` provisional, `ARGV[1]` quantity.
///
/// Releases the hold and takes the seats out of capacity in one step. An
/// absent capacity key stays absent.
pub const FOLD: &str = r"
local quantity = tonumber(ARGV[1])
local provisional = tonumber(redis.call('GET', KEYS[2]) or '0')
if provisional <= quantity then
    redis.call('DEL', KEYS[2])
else
    redis.call('DECRBY', KEYS[2], quantity)
end
local capacity = redis.call('GET', KEYS[1])
if capacity then
    local remaining = tonumber(capacity) - quantity
    if remaining < 0 then
        remaining = 0
    end
    redis.call('SET', KEYS[1], remaining)
end
return 0
";
