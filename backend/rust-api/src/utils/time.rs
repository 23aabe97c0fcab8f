use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;

pub fn chrono_to_bson(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

/// Falls back to the Unix epoch for values outside chrono's range.
pub fn bson_to_chrono(dt: BsonDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}

pub fn epoch_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bson_conversion_keeps_millisecond_precision() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
            + chrono::Duration::milliseconds(589);
        assert_eq!(bson_to_chrono(chrono_to_bson(dt)), dt);
        assert_eq!(epoch_millis(dt), chrono_to_bson(dt).timestamp_millis());
    }
}
