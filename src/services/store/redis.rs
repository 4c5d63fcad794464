// src/services/store/redis.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::MultiplexedConnection, Client, Script};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use super::{AssignOutcome, RatingOutcome, RideOwner, RideStore, Transition, TransitionOutcome};
use crate::{
    errors::{DispatchError, DispatchResult},
    models::{
        driver::{Driver, DriverRegistration, DriverUpdate},
        passenger::{Passenger, PassengerRegistration, PassengerUpdate},
        rating::{NewRating, Rating, RatingFilter, RatingUpdate},
        ride::{DispatchStats, NewRide, Ride, RideFilter, RideId, RideStatus},
    },
    utils::phone::normalize_phone,
};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "zc:".to_string(),
        }
    }
}

// KEYS: passenger, passenger active pointer, ride, all rides, passenger rides
// ARGV: ride id, ride json, score
const CREATE_RIDE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 'passenger_not_found' end
if redis.call('EXISTS', KEYS[2]) == 1 then return 'active_ride_exists' end
redis.call('SET', KEYS[3], ARGV[2])
redis.call('SET', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[4], ARGV[3], ARGV[1])
redis.call('ZADD', KEYS[5], ARGV[3], ARGV[1])
return 'ok'
"#;

// KEYS: ride, driver, driver active pointer, driver rides, all rides
// ARGV: driver id, now, ride id
const ASSIGN: &str = r#"
local driver_raw = redis.call('GET', KEYS[2])
if not driver_raw then return {'driver_not_found'} end
local ride_raw = redis.call('GET', KEYS[1])
if not ride_raw then return {'ride_not_found'} end
local driver = cjson.decode(driver_raw)
if not driver.is_available then return {'driver_busy'} end
local ride = cjson.decode(ride_raw)
if ride.status ~= 'waiting' then return {'already_taken'} end

ride.status = 'accepted'
ride.driver_id = tonumber(ARGV[1])
ride.accepted_at = ARGV[2]
ride.updated_at = ARGV[2]
driver.is_available = false
driver.updated_at = ARGV[2]

local encoded = cjson.encode(ride)
redis.call('SET', KEYS[1], encoded)
redis.call('SET', KEYS[2], cjson.encode(driver))
redis.call('SET', KEYS[3], ARGV[3])
local score = redis.call('ZSCORE', KEYS[5], ARGV[3]) or 0
redis.call('ZADD', KEYS[4], score, ARGV[3])
return {'assigned', encoded}
"#;

// KEYS: ride, passenger, passenger active pointer, [driver, driver active pointer]
// ARGV: allowed statuses (comma separated), next status, owner role, owner id,
//       timestamp field, release driver, count completion, terminal, now,
//       driver id the keys were declared for ('' when unassigned)
const TRANSITION: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return {'not_found'} end
local ride = cjson.decode(raw)

local driver_id = ''
if ride.driver_id ~= cjson.null and ride.driver_id ~= nil then
  driver_id = string.format('%d', ride.driver_id)
end
if driver_id ~= ARGV[10] then return {'stale'} end

local allowed = false
for status in string.gmatch(ARGV[1], '[^,]+') do
  if ride.status == status then allowed = true end
end
if not allowed then return {'invalid_transition', ride.status} end

local owner_id = tonumber(ARGV[4])
if ARGV[3] == 'passenger' then
  if ride.passenger_id ~= owner_id then return {'not_owner'} end
elseif ride.driver_id ~= owner_id then
  return {'not_owner'}
end

local now = ARGV[9]
local release = ARGV[6] == '1'
local count = ARGV[7] == '1'
local terminal = ARGV[8] == '1'

local function increment_ride_counter(key)
  local record_raw = redis.call('GET', key)
  if not record_raw then return end
  local record = cjson.decode(record_raw)
  record.total_rides = (record.total_rides or 0) + 1
  record.updated_at = now
  redis.call('SET', key, cjson.encode(record))
end

ride.status = ARGV[2]
if ride[ARGV[5]] == nil or ride[ARGV[5]] == cjson.null then ride[ARGV[5]] = now end
ride.updated_at = now
local encoded = cjson.encode(ride)
redis.call('SET', KEYS[1], encoded)

local released = ''
if driver_id ~= '' then
  if release then
    local driver_raw = redis.call('GET', KEYS[4])
    if driver_raw then
      local driver = cjson.decode(driver_raw)
      driver.is_available = true
      driver.updated_at = now
      redis.call('SET', KEYS[4], cjson.encode(driver))
      released = driver_id
    end
  end
  if count then increment_ride_counter(KEYS[4]) end
  if terminal then redis.call('DEL', KEYS[5]) end
end

if count then increment_ride_counter(KEYS[2]) end
if terminal then redis.call('DEL', KEYS[3]) end

return {'applied', encoded, released}
"#;

// KEYS: phone index, record, listing
// ARGV: id, record json, score
const INSERT_UNIQUE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then return 0 end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
return 1
"#;

// KEYS: ride, ride rating pointer, rating, all ratings
// ARGV: rating id, rating json, passenger id, score
const INSERT_RATING: &str = r#"
local ride_raw = redis.call('GET', KEYS[1])
if not ride_raw then return {'ride_not_found'} end
local ride = cjson.decode(ride_raw)
if ride.passenger_id ~= tonumber(ARGV[3]) then return {'not_owner'} end
if ride.status ~= 'completed' then return {'not_completed', ride.status} end
if redis.call('EXISTS', KEYS[2]) == 1 then return {'already_rated'} end

local rating = cjson.decode(ARGV[2])
rating.driver_id = ride.driver_id
local encoded = cjson.encode(rating)
redis.call('SET', KEYS[3], encoded)
redis.call('SET', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[4], ARGV[4], ARGV[1])
return {'rated', encoded}
"#;

// KEYS: rating, ride rating pointer, all ratings
// ARGV: rating id
const DELETE_RATING: &str = r#"
if redis.call('DEL', KEYS[1]) == 0 then return 0 end
if redis.call('GET', KEYS[2]) == ARGV[1] then redis.call('DEL', KEYS[2]) end
redis.call('ZREM', KEYS[3], ARGV[1])
return 1
"#;

// KEYS: record
// ARGV: patch json
const MERGE_RECORD: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return false end
local record = cjson.decode(raw)
for field, value in pairs(cjson.decode(ARGV[1])) do record[field] = value end
local encoded = cjson.encode(record)
redis.call('SET', KEYS[1], encoded)
return encoded
"#;

// KEYS: driver, driver active pointer
// ARGV: requested availability, now
const SET_AVAILABILITY: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return -1 end
local driver = cjson.decode(raw)
local available = ARGV[1] == '1'
local holds_ride = redis.call('EXISTS', KEYS[2]) == 1
if available ~= holds_ride then
  driver.is_available = available
  driver.updated_at = ARGV[2]
  redis.call('SET', KEYS[1], cjson.encode(driver))
end
if driver.is_available then return 1 else return 0 end
"#;

struct Scripts {
    create_ride: Script,
    assign: Script,
    transition: Script,
    insert_unique: Script,
    insert_rating: Script,
    delete_rating: Script,
    merge_record: Script,
    set_availability: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            create_ride: Script::new(CREATE_RIDE),
            assign: Script::new(ASSIGN),
            transition: Script::new(TRANSITION),
            insert_unique: Script::new(INSERT_UNIQUE),
            insert_rating: Script::new(INSERT_RATING),
            delete_rating: Script::new(DELETE_RATING),
            merge_record: Script::new(MERGE_RECORD),
            set_availability: Script::new(SET_AVAILABILITY),
        }
    }
}

/// Redis-backed store. Records are JSON strings; every check-and-write runs
/// as one Lua script so it is atomic on the server.
pub struct RedisRideStore {
    connection: MultiplexedConnection,
    prefix: String,
    scripts: Scripts,
}

impl RedisRideStore {
    pub async fn new(config: StoreConfig) -> DispatchResult<Self> {
        let client = Client::open(config.redis_url.clone())
            .map_err(|e| DispatchError::InvalidConfiguration(format!("REDIS_URL: {}", e)))?;
        let connection = client.get_multiplexed_async_connection().await?;

        tracing::info!("Connected to Redis ride store at {}", config.redis_url);

        Ok(Self {
            connection,
            prefix: config.key_prefix,
            scripts: Scripts::load(),
        })
    }

    fn key(&self, parts: &[&str]) -> String {
        prefixed(&self.prefix, parts)
    }

    fn ride_key(&self, id: RideId) -> String {
        self.key(&["ride", &id.to_string()])
    }

    fn driver_key(&self, id: u64) -> String {
        self.key(&["driver", &id.to_string()])
    }

    fn passenger_key(&self, id: u64) -> String {
        self.key(&["passenger", &id.to_string()])
    }

    fn rating_key(&self, id: u64) -> String {
        self.key(&["rating", &id.to_string()])
    }

    fn ride_rating_key(&self, ride_id: RideId) -> String {
        self.key(&["ride", &ride_id.to_string(), "rating"])
    }

    async fn next_id(&self, sequence: &str) -> DispatchResult<u64> {
        let mut conn = self.connection.clone();
        let id: u64 = redis::cmd("INCR")
            .arg(self.key(&["seq", sequence]))
            .query_async(&mut conn)
            .await?;
        Ok(id)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> DispatchResult<Option<T>> {
        let mut conn = self.connection.clone();
        let data: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        data.map(|raw| serde_json::from_str(&raw)).transpose().map_err(DispatchError::from)
    }

    async fn get_many<T: DeserializeOwned>(&self, keys: Vec<String>) -> DispatchResult<Vec<T>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection.clone();
        let data: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        data.into_iter()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).map_err(DispatchError::from))
            .collect()
    }

    /// Ids from a sorted-set index, highest score (newest) first.
    async fn index_newest_first(&self, index: &str, min: &str, max: &str) -> DispatchResult<Vec<u64>> {
        let mut conn = self.connection.clone();
        let ids: Vec<u64> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(index)
            .arg(max)
            .arg(min)
            .query_async(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn rides_in_index(&self, index: String) -> DispatchResult<Vec<Ride>> {
        let ids = self.index_newest_first(&index, "-inf", "+inf").await?;
        self.get_many(ids.into_iter().map(|id| self.ride_key(id)).collect()).await
    }

    async fn active_ride(&self, pointer: String) -> DispatchResult<Option<Ride>> {
        let Some(ride_id) = self.pointer(pointer).await? else {
            return Ok(None);
        };
        // The pointer can be cleared between the two reads
        let ride: Option<Ride> = self.get_json(&self.ride_key(ride_id)).await?;
        Ok(ride.filter(|ride| ride.status.is_active()))
    }

    async fn merge(&self, key: String, patch: Map<String, Value>) -> DispatchResult<Option<String>> {
        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.merge_record.prepare_invoke();
        invocation.key(key).arg(Value::Object(patch).to_string());
        let merged: Option<String> = invocation.invoke_async(&mut conn).await?;
        Ok(merged)
    }

    async fn card(&self, index: String) -> DispatchResult<u64> {
        let mut conn = self.connection.clone();
        let count: u64 = redis::cmd("ZCARD").arg(index).query_async(&mut conn).await?;
        Ok(count)
    }

    /// Follows a key holding a record id.
    async fn pointer(&self, key: String) -> DispatchResult<Option<u64>> {
        let mut conn = self.connection.clone();
        let id: Option<u64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(id)
    }

    /// `false` when the phone is already taken.
    async fn insert_unique(
        &self,
        phone_key: String,
        record_key: String,
        listing: String,
        id: u64,
        record: String,
        score: i64,
    ) -> DispatchResult<bool> {
        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.insert_unique.prepare_invoke();
        invocation.key(phone_key).key(record_key).key(listing).arg(id).arg(record).arg(score);
        let inserted: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(inserted == 1)
    }

    async fn passenger_by_phone(&self, phone: &str) -> DispatchResult<Option<Passenger>> {
        match self.pointer(self.key(&["phone", "passenger", phone])).await? {
            Some(id) => self.get_passenger(id).await,
            None => Ok(None),
        }
    }

    /// `None` when the ride gained a driver after `current` was read, so the
    /// declared keys no longer cover it.
    async fn run_transition(&self, current: &Ride, transition: Transition) -> DispatchResult<Option<TransitionOutcome>> {
        let allowed: Vec<&str> = transition
            .expected
            .iter()
            .filter(|status| status.can_transition_to(transition.next))
            .map(RideStatus::as_str)
            .collect();
        let (role, owner_id) = match transition.owner {
            RideOwner::Passenger(id) => ("passenger", id),
            RideOwner::Driver(id) => ("driver", id),
        };

        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.transition.prepare_invoke();
        for key in transition_keys(&self.prefix, current) {
            invocation.key(key);
        }
        invocation
            .arg(allowed.join(","))
            .arg(transition.next.as_str())
            .arg(role)
            .arg(owner_id)
            .arg(transition.stamp.as_str())
            .arg(flag(transition.effects.release_driver))
            .arg(flag(transition.effects.count_completion))
            .arg(flag(transition.next.is_terminal()))
            .arg(Utc::now().to_rfc3339())
            .arg(current.driver_id.map_or_else(String::new, |id| id.to_string()));
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

        let outcome = match reply.first().map(String::as_str) {
            Some("stale") => return Ok(None),
            Some("applied") => {
                let ride = decode_ride(reply.get(1))?;
                let released_driver = reply.get(2).and_then(|id| id.parse().ok());
                TransitionOutcome::Applied { ride, released_driver }
            }
            Some("not_found") => TransitionOutcome::NotFound,
            Some("not_owner") => TransitionOutcome::NotOwner,
            Some("invalid_transition") => {
                let status = reply
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| DispatchError::internal_error("Ride record has an unknown status"))?;
                TransitionOutcome::InvalidTransition(status)
            }
            other => {
                return Err(DispatchError::internal_error(format!(
                    "Unexpected transition reply: {:?}",
                    other
                )));
            }
        };
        Ok(Some(outcome))
    }
}

fn prefixed(prefix: &str, parts: &[&str]) -> String {
    format!("{}{}", prefix, parts.join(":"))
}

/// Every key the transition script may touch for `ride`. Driver keys are
/// declared only once the ride has a driver.
fn transition_keys(prefix: &str, ride: &Ride) -> Vec<String> {
    let passenger = ride.passenger_id.to_string();
    let mut keys = vec![
        prefixed(prefix, &["ride", &ride.id.to_string()]),
        prefixed(prefix, &["passenger", &passenger]),
        prefixed(prefix, &["passenger", &passenger, "active"]),
    ];
    if let Some(driver_id) = ride.driver_id {
        let driver = driver_id.to_string();
        keys.push(prefixed(prefix, &["driver", &driver]));
        keys.push(prefixed(prefix, &["driver", &driver, "active"]));
    }
    keys
}

fn score(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn decode_ride(raw: Option<&String>) -> DispatchResult<Ride> {
    let raw = raw.ok_or_else(|| DispatchError::internal_error("Ride script returned no record"))?;
    Ok(serde_json::from_str(raw)?)
}

fn driver_patch(update: &DriverUpdate, now: DateTime<Utc>) -> DispatchResult<Map<String, Value>> {
    let mut patch = Map::new();
    if let Some(name) = &update.name {
        patch.insert("name".to_string(), json!(name.trim()));
    }
    if let Some(vehicle) = &update.vehicle {
        patch.insert("vehicle".to_string(), serde_json::to_value(vehicle.normalized())?);
    }
    if let Some(expires_at) = update.expires_at {
        patch.insert("expires_at".to_string(), serde_json::to_value(expires_at)?);
    }
    if let Some(is_blocked) = update.is_blocked {
        patch.insert("is_blocked".to_string(), json!(is_blocked));
    }
    patch.insert("updated_at".to_string(), serde_json::to_value(now)?);
    Ok(patch)
}

fn passenger_patch(update: &PassengerUpdate, now: DateTime<Utc>) -> DispatchResult<Map<String, Value>> {
    let mut patch = Map::new();
    if let Some(name) = &update.name {
        patch.insert("name".to_string(), json!(name.trim()));
    }
    if let Some(is_blocked) = update.is_blocked {
        patch.insert("is_blocked".to_string(), json!(is_blocked));
    }
    patch.insert("updated_at".to_string(), serde_json::to_value(now)?);
    Ok(patch)
}

fn rating_patch(update: &RatingUpdate, now: DateTime<Utc>) -> DispatchResult<Map<String, Value>> {
    let mut patch = Map::new();
    if let Some(stars) = update.stars {
        patch.insert("stars".to_string(), json!(stars));
    }
    if let Some(comment) = update.comment_change() {
        patch.insert("comment".to_string(), json!(comment));
    }
    patch.insert("updated_at".to_string(), serde_json::to_value(now)?);
    Ok(patch)
}

#[async_trait]
impl RideStore for RedisRideStore {
    async fn create_ride(&self, ride: NewRide) -> DispatchResult<Ride> {
        let id = self.next_id("ride").await?;
        let passenger_id = ride.passenger_id.to_string();
        let ride = ride.into_ride(id, Utc::now());

        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.create_ride.prepare_invoke();
        invocation
            .key(self.key(&["passenger", &passenger_id]))
            .key(self.key(&["passenger", &passenger_id, "active"]))
            .key(self.ride_key(id))
            .key(self.key(&["rides"]))
            .key(self.key(&["passenger", &passenger_id, "rides"]))
            .arg(id)
            .arg(serde_json::to_string(&ride)?)
            .arg(score(ride.created_at));
        let result: String = invocation.invoke_async(&mut conn).await?;

        match result.as_str() {
            "ok" => Ok(ride),
            "active_ride_exists" => Err(DispatchError::ActiveRideExists),
            "passenger_not_found" => Err(DispatchError::PassengerNotFound(ride.passenger_id)),
            other => Err(DispatchError::internal_error(format!("Unexpected create reply: {}", other))),
        }
    }

    async fn conditional_assign(&self, ride_id: RideId, driver_id: u64) -> DispatchResult<AssignOutcome> {
        let driver = driver_id.to_string();
        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.assign.prepare_invoke();
        invocation
            .key(self.ride_key(ride_id))
            .key(self.driver_key(driver_id))
            .key(self.key(&["driver", &driver, "active"]))
            .key(self.key(&["driver", &driver, "rides"]))
            .key(self.key(&["rides"]))
            .arg(driver_id)
            .arg(Utc::now().to_rfc3339())
            .arg(ride_id);
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

        match reply.first().map(String::as_str) {
            Some("assigned") => Ok(AssignOutcome::Assigned(decode_ride(reply.get(1))?)),
            Some("already_taken") => Ok(AssignOutcome::AlreadyTaken),
            Some("driver_busy") => Ok(AssignOutcome::DriverBusy),
            Some("ride_not_found") => Ok(AssignOutcome::RideNotFound),
            Some("driver_not_found") => Ok(AssignOutcome::DriverNotFound),
            other => Err(DispatchError::internal_error(format!("Unexpected assign reply: {:?}", other))),
        }
    }

    async fn conditional_transition(&self, ride_id: RideId, transition: Transition) -> DispatchResult<TransitionOutcome> {
        // A ride's driver goes from none to one at most once, so a second read settles it
        for _ in 0..2 {
            let Some(current) = self.get_ride(ride_id).await? else {
                return Ok(TransitionOutcome::NotFound);
            };
            if let Some(outcome) = self.run_transition(&current, transition).await? {
                return Ok(outcome);
            }
            tracing::debug!(ride_id, "Ride was assigned while preparing a transition, retrying");
        }
        Err(DispatchError::internal_error(format!("Ride {} changed driver twice", ride_id)))
    }

    async fn get_ride(&self, ride_id: RideId) -> DispatchResult<Option<Ride>> {
        self.get_json(&self.ride_key(ride_id)).await
    }

    async fn active_ride_for_passenger(&self, passenger_id: u64) -> DispatchResult<Option<Ride>> {
        self.active_ride(self.key(&["passenger", &passenger_id.to_string(), "active"])).await
    }

    async fn active_ride_for_driver(&self, driver_id: u64) -> DispatchResult<Option<Ride>> {
        self.active_ride(self.key(&["driver", &driver_id.to_string(), "active"])).await
    }

    async fn rides_for_passenger(&self, passenger_id: u64) -> DispatchResult<Vec<Ride>> {
        self.rides_in_index(self.key(&["passenger", &passenger_id.to_string(), "rides"])).await
    }

    async fn rides_for_driver(&self, driver_id: u64) -> DispatchResult<Vec<Ride>> {
        self.rides_in_index(self.key(&["driver", &driver_id.to_string(), "rides"])).await
    }

    async fn list_rides(&self, filter: &RideFilter) -> DispatchResult<Vec<Ride>> {
        let min = filter.start.map_or("-inf".to_string(), |at| score(at).to_string());
        let max = filter.end.map_or("+inf".to_string(), |at| score(at).to_string());
        let ids = self.index_newest_first(&self.key(&["rides"]), &min, &max).await?;
        let rides: Vec<Ride> = self.get_many(ids.into_iter().map(|id| self.ride_key(id)).collect()).await?;
        Ok(rides.into_iter().filter(|ride| filter.matches(ride)).collect())
    }

    async fn insert_driver(&self, registration: DriverRegistration) -> DispatchResult<Driver> {
        let id = self.next_id("driver").await?;
        let driver = registration.into_driver(id, Utc::now());

        let inserted = self
            .insert_unique(
                self.key(&["phone", "driver", &driver.phone]),
                self.driver_key(id),
                self.key(&["drivers"]),
                id,
                serde_json::to_string(&driver)?,
                score(driver.created_at),
            )
            .await?;
        if !inserted {
            return Err(DispatchError::conflict(format!("Driver already registered: {}", driver.phone)));
        }
        Ok(driver)
    }

    async fn get_driver(&self, driver_id: u64) -> DispatchResult<Option<Driver>> {
        self.get_json(&self.driver_key(driver_id)).await
    }

    async fn update_driver(&self, driver_id: u64, update: DriverUpdate) -> DispatchResult<Option<Driver>> {
        let merged = self.merge(self.driver_key(driver_id), driver_patch(&update, Utc::now())?).await?;
        merged.map(|raw| serde_json::from_str(&raw)).transpose().map_err(DispatchError::from)
    }

    async fn set_driver_availability(&self, driver_id: u64, available: bool) -> DispatchResult<Option<bool>> {
        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.set_availability.prepare_invoke();
        invocation
            .key(self.driver_key(driver_id))
            .key(self.key(&["driver", &driver_id.to_string(), "active"]))
            .arg(flag(available))
            .arg(Utc::now().to_rfc3339());
        let stored: i64 = invocation.invoke_async(&mut conn).await?;

        Ok(match stored {
            -1 => None,
            value => Some(value == 1),
        })
    }

    async fn list_drivers(&self, search: Option<&str>) -> DispatchResult<Vec<Driver>> {
        let ids = self.index_newest_first(&self.key(&["drivers"]), "-inf", "+inf").await?;
        let drivers: Vec<Driver> = self.get_many(ids.into_iter().map(|id| self.driver_key(id)).collect()).await?;
        Ok(drivers
            .into_iter()
            .filter(|driver| search.map_or(true, |needle| driver.matches_search(needle)))
            .collect())
    }

    async fn find_or_create_passenger(&self, registration: PassengerRegistration) -> DispatchResult<Passenger> {
        if let Some(existing) = self.passenger_by_phone(&normalize_phone(&registration.phone)).await? {
            return Ok(existing);
        }

        let id = self.next_id("passenger").await?;
        let passenger = registration.into_passenger(id, Utc::now());
        let inserted = self
            .insert_unique(
                self.key(&["phone", "passenger", &passenger.phone]),
                self.passenger_key(id),
                self.key(&["passengers"]),
                id,
                serde_json::to_string(&passenger)?,
                score(passenger.created_at),
            )
            .await?;
        if inserted {
            return Ok(passenger);
        }

        // Another registration for the same phone won the insert
        self.passenger_by_phone(&passenger.phone).await?.ok_or_else(|| {
            DispatchError::internal_error(format!("Phone index points at a missing passenger: {}", passenger.phone))
        })
    }

    async fn get_passenger(&self, passenger_id: u64) -> DispatchResult<Option<Passenger>> {
        self.get_json(&self.passenger_key(passenger_id)).await
    }

    async fn update_passenger(&self, passenger_id: u64, update: PassengerUpdate) -> DispatchResult<Option<Passenger>> {
        let merged = self
            .merge(self.passenger_key(passenger_id), passenger_patch(&update, Utc::now())?)
            .await?;
        merged.map(|raw| serde_json::from_str(&raw)).transpose().map_err(DispatchError::from)
    }

    async fn list_passengers(&self, search: Option<&str>) -> DispatchResult<Vec<Passenger>> {
        let ids = self.index_newest_first(&self.key(&["passengers"]), "-inf", "+inf").await?;
        let passengers: Vec<Passenger> = self
            .get_many(ids.into_iter().map(|id| self.passenger_key(id)).collect())
            .await?;
        Ok(passengers
            .into_iter()
            .filter(|passenger| search.map_or(true, |needle| passenger.matches_search(needle)))
            .collect())
    }

    async fn insert_rating(&self, rating: NewRating) -> DispatchResult<RatingOutcome> {
        let id = self.next_id("rating").await?;
        let ride_id = rating.ride_id;
        let passenger_id = rating.passenger_id;
        // The script copies the driver over from the ride
        let rating = rating.into_rating(id, 0, Utc::now());

        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.insert_rating.prepare_invoke();
        invocation
            .key(self.ride_key(ride_id))
            .key(self.ride_rating_key(ride_id))
            .key(self.rating_key(id))
            .key(self.key(&["ratings"]))
            .arg(id)
            .arg(serde_json::to_string(&rating)?)
            .arg(passenger_id)
            .arg(score(rating.created_at));
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;

        match reply.first().map(String::as_str) {
            Some("rated") => {
                let raw = reply
                    .get(1)
                    .ok_or_else(|| DispatchError::internal_error("Rating script returned no record"))?;
                Ok(RatingOutcome::Rated(serde_json::from_str(raw)?))
            }
            Some("already_rated") => Ok(RatingOutcome::AlreadyRated),
            Some("ride_not_found") => Ok(RatingOutcome::RideNotFound),
            Some("not_owner") => Ok(RatingOutcome::NotOwner),
            Some("not_completed") => {
                let status = reply
                    .get(1)
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| DispatchError::internal_error("Ride record has an unknown status"))?;
                Ok(RatingOutcome::NotCompleted(status))
            }
            other => Err(DispatchError::internal_error(format!("Unexpected rating reply: {:?}", other))),
        }
    }

    async fn get_rating(&self, rating_id: u64) -> DispatchResult<Option<Rating>> {
        self.get_json(&self.rating_key(rating_id)).await
    }

    async fn rating_for_ride(&self, ride_id: RideId) -> DispatchResult<Option<Rating>> {
        match self.pointer(self.ride_rating_key(ride_id)).await? {
            Some(id) => self.get_rating(id).await,
            None => Ok(None),
        }
    }

    async fn list_ratings(&self, filter: &RatingFilter) -> DispatchResult<Vec<Rating>> {
        let ids = self.index_newest_first(&self.key(&["ratings"]), "-inf", "+inf").await?;
        let ratings: Vec<Rating> = self.get_many(ids.into_iter().map(|id| self.rating_key(id)).collect()).await?;
        Ok(ratings.into_iter().filter(|rating| filter.matches(rating)).collect())
    }

    async fn update_rating(&self, rating_id: u64, update: RatingUpdate) -> DispatchResult<Option<Rating>> {
        let merged = self.merge(self.rating_key(rating_id), rating_patch(&update, Utc::now())?).await?;
        merged.map(|raw| serde_json::from_str(&raw)).transpose().map_err(DispatchError::from)
    }

    async fn delete_rating(&self, rating_id: u64) -> DispatchResult<bool> {
        let Some(rating) = self.get_rating(rating_id).await? else {
            return Ok(false);
        };

        let mut conn = self.connection.clone();
        let mut invocation = self.scripts.delete_rating.prepare_invoke();
        invocation
            .key(self.rating_key(rating_id))
            .key(self.ride_rating_key(rating.ride_id))
            .key(self.key(&["ratings"]))
            .arg(rating_id);
        let deleted: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(deleted == 1)
    }

    async fn stats(&self) -> DispatchResult<DispatchStats> {
        let (rides, total_passengers, total_drivers) = futures::try_join!(
            self.rides_in_index(self.key(&["rides"])),
            self.card(self.key(&["passengers"])),
            self.card(self.key(&["drivers"])),
        )?;
        let today = Utc::now().date_naive();

        let mut stats = DispatchStats {
            total_passengers,
            total_drivers,
            total_rides: rides.len() as u64,
            ..Default::default()
        };
        for ride in &rides {
            *stats.rides_by_status.entry(ride.status).or_insert(0) += 1;
            if ride.created_at.date_naive() == today {
                stats.rides_today += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ride::Coordinates;

    async fn connect() -> RedisRideStore {
        let config = StoreConfig {
            key_prefix: format!("zc-test-{}:", uuid::Uuid::new_v4()),
            ..Default::default()
        };
        RedisRideStore::new(config).await.unwrap()
    }

    #[test]
    fn test_driver_patch_only_carries_present_fields() {
        let now = Utc::now();
        let patch = driver_patch(
            &DriverUpdate {
                is_blocked: Some(true),
                ..Default::default()
            },
            now,
        )
        .unwrap();
        assert_eq!(patch.get("is_blocked"), Some(&json!(true)));
        assert!(patch.contains_key("updated_at"));
        assert!(!patch.contains_key("name"));
        assert!(!patch.contains_key("is_available"));
    }

    #[test]
    fn test_transition_keys_follow_assignment() {
        let mut ride = ride_request(4).into_ride(9, Utc::now());
        assert_eq!(
            transition_keys("zc:", &ride),
            vec!["zc:ride:9", "zc:passenger:4", "zc:passenger:4:active"]
        );

        ride.driver_id = Some(2);
        let keys = transition_keys("zc:", &ride);
        assert_eq!(keys.len(), 5);
        assert_eq!(&keys[3..], ["zc:driver:2", "zc:driver:2:active"]);
    }

    #[test]
    fn test_scripts_only_touch_declared_keys() {
        // Key names built inside a script would need string concatenation
        for script in [
            CREATE_RIDE,
            ASSIGN,
            TRANSITION,
            INSERT_UNIQUE,
            INSERT_RATING,
            DELETE_RATING,
            MERGE_RECORD,
            SET_AVAILABILITY,
        ] {
            assert!(!script.contains(".."), "script builds a key: {}", script);
        }
    }

    #[test]
    fn test_rating_patch_can_clear_comment() {
        let patch = rating_patch(
            &RatingUpdate {
                stars: Some(3),
                comment: Some(" ".to_string()),
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(patch.get("stars"), Some(&json!(3)));
        assert_eq!(patch.get("comment"), Some(&Value::Null));
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_ratings_and_cancellation_round_trip() {
        let store = connect().await;
        let registration = PassengerRegistration {
            name: "Ana".to_string(),
            phone: "5511999999999".to_string(),
        };
        let passenger = store.find_or_create_passenger(registration.clone()).await.unwrap();
        assert_eq!(store.find_or_create_passenger(registration).await.unwrap().id, passenger.id);

        // Unassigned: only ride and passenger keys are declared
        let waiting = store.create_ride(ride_request(passenger.id)).await.unwrap();
        assert!(matches!(
            store
                .conditional_transition(waiting.id, Transition::cancel_by_passenger(passenger.id))
                .await
                .unwrap(),
            TransitionOutcome::Applied { released_driver: None, .. }
        ));

        let driver = store
            .insert_driver(DriverRegistration {
                name: "Carlos".to_string(),
                phone: "5511888888888".to_string(),
                vehicle: crate::models::driver::Vehicle {
                    model: "Gol".to_string(),
                    color: "Branco".to_string(),
                    plate: "ABC1234".to_string(),
                },
                expires_at: Utc::now() + chrono::Duration::days(30),
            })
            .await
            .unwrap();
        let ride = store.create_ride(ride_request(passenger.id)).await.unwrap();
        store.conditional_assign(ride.id, driver.id).await.unwrap();
        store.conditional_transition(ride.id, Transition::start(driver.id)).await.unwrap();
        store.conditional_transition(ride.id, Transition::complete(driver.id)).await.unwrap();

        let new_rating = || NewRating {
            ride_id: ride.id,
            passenger_id: passenger.id,
            stars: 4,
            comment: Some("Good".to_string()),
        };
        let RatingOutcome::Rated(rating) = store.insert_rating(new_rating()).await.unwrap() else {
            panic!("expected a rating");
        };
        assert_eq!(rating.driver_id, driver.id);
        assert!(matches!(
            store.insert_rating(new_rating()).await.unwrap(),
            RatingOutcome::AlreadyRated
        ));

        let updated = store
            .update_rating(
                rating.id,
                RatingUpdate {
                    stars: Some(5),
                    comment: Some(String::new()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.stars, 5);
        assert_eq!(updated.comment, None);
        assert_eq!(store.list_ratings(&RatingFilter::for_driver(driver.id)).await.unwrap().len(), 1);

        assert!(store.delete_rating(rating.id).await.unwrap());
        assert!(store.rating_for_ride(ride.id).await.unwrap().is_none());
        assert!(!store.delete_rating(rating.id).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_assign_and_complete_round_trip() {
        let store = connect().await;
        let passenger = store
            .find_or_create_passenger(PassengerRegistration {
                name: "Ana".to_string(),
                phone: "5511999999999".to_string(),
            })
            .await
            .unwrap();
        let driver = store
            .insert_driver(DriverRegistration {
                name: "Carlos".to_string(),
                phone: "5511888888888".to_string(),
                vehicle: crate::models::driver::Vehicle {
                    model: "Gol".to_string(),
                    color: "Branco".to_string(),
                    plate: "ABC1234".to_string(),
                },
                expires_at: Utc::now() + chrono::Duration::days(30),
            })
            .await
            .unwrap();

        let ride = store
            .create_ride(NewRide {
                passenger_id: passenger.id,
                origin_address: "Rua A".to_string(),
                origin: Coordinates::new(-23.5, -46.6),
                destination_address: "Rua B".to_string(),
                destination: Coordinates::new(-23.6, -46.7),
                distance_km: 5.25,
                duration_min: 12,
            })
            .await
            .unwrap();
        assert!(matches!(
            store.create_ride(ride_request(passenger.id)).await,
            Err(DispatchError::ActiveRideExists)
        ));

        assert!(matches!(
            store.conditional_assign(ride.id, driver.id).await.unwrap(),
            AssignOutcome::Assigned(_)
        ));
        assert!(matches!(
            store.conditional_transition(ride.id, Transition::start(driver.id)).await.unwrap(),
            TransitionOutcome::Applied { .. }
        ));
        assert!(matches!(
            store.conditional_transition(ride.id, Transition::complete(driver.id)).await.unwrap(),
            TransitionOutcome::Applied { released_driver: Some(_), .. }
        ));

        let driver = store.get_driver(driver.id).await.unwrap().unwrap();
        assert!(driver.is_available);
        assert_eq!(driver.total_rides, 1);
        assert!(store.active_ride_for_passenger(passenger.id).await.unwrap().is_none());
        assert_eq!(store.rides_for_driver(driver.id).await.unwrap().len(), 1);
    }

    fn ride_request(passenger_id: u64) -> NewRide {
        NewRide {
            passenger_id,
            origin_address: "Rua A".to_string(),
            origin: Coordinates::new(-23.5, -46.6),
            destination_address: "Rua B".to_string(),
            destination: Coordinates::new(-23.6, -46.7),
            distance_km: 3.0,
            duration_min: 8,
        }
    }
}
