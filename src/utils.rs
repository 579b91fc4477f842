use std::convert::TryFrom;
use std::time::{Duration, SystemTime};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Converts a `SystemTime` object into a float timestamp.
pub fn datetime_to_timestamp(st: &SystemTime) -> f64 {
    match st.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => duration.as_secs_f64(),
        Err(_) => 0.0,
    }
}

/// Converts a float timestamp into a `SystemTime`, if it is representable.
pub fn timestamp_to_datetime(ts: f64) -> Option<SystemTime> {
    let duration = Duration::try_from_secs_f64(ts).ok()?;
    SystemTime::UNIX_EPOCH.checked_add(duration)
}

pub fn to_rfc3339(st: &SystemTime) -> String {
    st.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .and_then(|duration| TryFrom::try_from(duration).ok())
        .and_then(|duration| OffsetDateTime::UNIX_EPOCH.checked_add(duration))
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_default()
}

/// Parses the type name of a value from its `Debug` output.
///
/// ```
/// use tnet_sentry::utils::parse_type_from_debug;
///
/// let err = "NaN".parse::<usize>().unwrap_err();
/// assert_eq!(&parse_type_from_debug(&err), "ParseIntError");
/// ```
pub fn parse_type_from_debug<D: std::fmt::Debug + ?Sized>(d: &D) -> String {
    let dbg = format!("{:#?}", d);

    dbg.split(&[' ', '(', '{', '\r', '\n'][..])
        .next()
        .unwrap_or(&dbg)
        .trim()
        .to_owned()
}

pub mod ts_seconds_float {
    use std::fmt;

    use serde::{de, ser};

    use super::*;

    pub fn deserialize<'de, D>(d: D) -> Result<SystemTime, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        d.deserialize_any(SecondsTimestampVisitor)
    }

    pub fn serialize<S>(st: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        match st.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(duration) => {
                if duration.subsec_nanos() == 0 {
                    serializer.serialize_u64(duration.as_secs())
                } else {
                    serializer.serialize_f64(duration.as_secs_f64())
                }
            }
            Err(_) => Err(ser::Error::custom(format!(
                "invalid `SystemTime` instance: {:?}",
                st
            ))),
        }
    }

    struct SecondsTimestampVisitor;

    impl de::Visitor<'_> for SecondsTimestampVisitor {
        type Value = SystemTime;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a unix timestamp")
        }

        fn visit_f64<E>(self, value: f64) -> Result<SystemTime, E>
        where
            E: de::Error,
        {
            timestamp_to_datetime(value)
                .ok_or_else(|| E::custom(format!("invalid timestamp: {}", value)))
        }

        fn visit_i64<E>(self, value: i64) -> Result<SystemTime, E>
        where
            E: de::Error,
        {
            let value = u64::try_from(value).map_err(|e| E::custom(format!("{}", e)))?;
            self.visit_u64(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<SystemTime, E>
        where
            E: de::Error,
        {
            SystemTime::UNIX_EPOCH
                .checked_add(Duration::from_secs(value))
                .ok_or_else(|| E::custom(format!("invalid timestamp: {}", value)))
        }

        fn visit_str<E>(self, value: &str) -> Result<SystemTime, E>
        where
            E: de::Error,
        {
            let dt =
                OffsetDateTime::parse(value, &Rfc3339).map_err(|e| E::custom(format!("{}", e)))?;
            let secs =
                u64::try_from(dt.unix_timestamp()).map_err(|e| E::custom(format!("{}", e)))?;
            SystemTime::UNIX_EPOCH
                .checked_add(Duration::new(secs, dt.nanosecond()))
                .ok_or_else(|| E::custom("invalid timestamp"))
        }
    }
}

pub mod ts_seconds_float_opt {
    use serde::{de, ser};

    use super::*;

    pub fn deserialize<'de, D>(d: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        ts_seconds_float::deserialize(d).map(Some)
    }

    pub fn serialize<S>(st: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: ser::Serializer,
    {
        match st {
            Some(st) => ts_seconds_float::serialize(st, serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_type_from_debug() {
        use parse_type_from_debug as parse;
        #[derive(Debug)]
        struct MyStruct;
        assert_eq!(&parse(&MyStruct), "MyStruct");

        let err = "NaN".parse::<usize>().unwrap_err();
        assert_eq!(&parse(&err), "ParseIntError");

        let err = "ftp://x@y/1".parse::<crate::Dsn>().unwrap_err();
        assert_eq!(&parse(&err), "InvalidScheme");
    }

    #[test]
    fn test_timestamp_conversions() {
        let st = SystemTime::UNIX_EPOCH + Duration::from_millis(1_595_256_674_296);
        assert_eq!(to_rfc3339(&st), "2020-07-20T14:51:14.296Z");
        let ts = datetime_to_timestamp(&st);
        assert!((ts - 1_595_256_674.296).abs() < 1e-6);
        assert!(timestamp_to_datetime(-1.0).is_none());
        assert!(timestamp_to_datetime(f64::NAN).is_none());
        assert!(timestamp_to_datetime(1e300).is_none());
    }
}
