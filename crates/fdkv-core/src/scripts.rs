//! Server-side Lua scripts backing the `ServerScript` insert/delete
//! strategies. Both scripts are evaluated atomically by the KV
//! server via `EVAL`/`EVALSHA`; the in-memory backend runs an equivalent
//! native routine under a single lock instead of embedding a Lua VM.
//!
//! KEYS/ARGV layout for `INSERT_SCRIPT`:
//!   KEYS[1]            = table index-set key
//!   ARGV[1]            = primary-key identifier
//!   then, per field, in declaration order:
//!     ARGV[i]   = field value (empty string sentinel for null — never
//!                 written, see the field_value guard below)
//!     ARGV[i+1] = number of functional dependencies on this field
//!     KEYS[..]  = that many dependency index-set keys
//!   and one more KEYS entry per field for the field's own value key.
//!   On a broken dependency the script aborts with an error reply of
//!   `DEPENDENCY_BROKEN:<dependency index-set key>`, naming the key the
//!   caller should parse to report which declared dependency was violated.
pub const INSERT_SCRIPT: &str = r#"
local argv_idx = 2
local keys_idx = 2

local dependency_updates = {}
local field_writes = {}

while keys_idx <= #KEYS do
    local field_key = KEYS[keys_idx]
    local has_value = ARGV[argv_idx]
    local field_value = ARGV[argv_idx + 1]
    local dependency_count = tonumber(ARGV[argv_idx + 2])
    argv_idx = argv_idx + 3

    if has_value == "1" then
        table.insert(field_writes, {field_key, field_value})
    end

    for dependency_iter = 1, dependency_count do
        local dependency_key = KEYS[keys_idx + dependency_iter]
        local existing_member = redis.call("SRANDMEMBER", dependency_key)
        if existing_member then
            local expected_value = redis.call("GET", existing_member)
            if has_value == "1" then
                if field_value ~= expected_value then
                    return redis.error_reply("DEPENDENCY_BROKEN:" .. dependency_key)
                end
            else
                if expected_value ~= false then
                    return redis.error_reply("DEPENDENCY_BROKEN:" .. dependency_key)
                end
            end
        end
        table.insert(dependency_updates, {dependency_key, field_key})
    end

    keys_idx = keys_idx + dependency_count + 1
end

for i = 1, #dependency_updates do
    redis.call("SADD", dependency_updates[i][1], dependency_updates[i][2])
end

redis.call("SADD", KEYS[1], ARGV[1])

for i = 1, #field_writes do
    redis.call("SET", field_writes[i][1], field_writes[i][2])
end

return "OK"
"#;

/// KEYS/ARGV layout for `DELETE_SCRIPT`:
///   KEYS[1] = table index-set key
///   ARGV[1] = primary-key identifier
///   then, per field: KEYS[..] = field value key, followed by that many
///   dependency index-set keys, with ARGV carrying the dependency count.
pub const DELETE_SCRIPT: &str = r#"
local argv_idx = 2
local keys_idx = 2

while keys_idx <= #KEYS do
    local field_key = KEYS[keys_idx]
    local dependency_count = tonumber(ARGV[argv_idx])
    argv_idx = argv_idx + 1

    for dependency_iter = 1, dependency_count do
        local dependency_key = KEYS[keys_idx + dependency_iter]
        redis.call("SREM", dependency_key, field_key)
    end

    redis.call("DEL", field_key)
    keys_idx = keys_idx + dependency_count + 1
end

redis.call("SREM", KEYS[1], ARGV[1])

return "OK"
"#;
