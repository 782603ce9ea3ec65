//! Server-side scripts shared by every Redis-protocol backend.

pub const RELEASE_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// ARGV: token, ttl ms.
pub const EXTEND_IF_OWNER: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

/// ARGV: now ms, window ms, limit, member, key expiry seconds.
pub const RECORD_IN_WINDOW: &str = r"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
if redis.call('ZCARD', KEYS[1]) >= limit then
  return 0
end
redis.call('ZADD', KEYS[1], now, ARGV[4])
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[5]))
return 1
";

/// Rate keys outlive their window slightly so a key idles out on its own.
pub const WINDOW_EXPIRY_SLACK_SECS: u64 = 5;

pub fn window_expiry_secs(window_ms: u64) -> u64 {
    window_ms.div_ceil(1000) + WINDOW_EXPIRY_SLACK_SECS
}
