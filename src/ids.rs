// Trip id anatomy.
//
// Static ids look like `AFA23GEN-1038-Sunday-00_073550_1..S03R`, feed ids like
// `073550_1..S03R`. Every consumer goes through these helpers so static and
// live ids are always cut the same way.

/// Segment between the first and second underscore (or to the end when there
/// is no second one). Ids without any underscore are their own short id.
pub fn short_trip_id(trip_id: &str) -> &str {
    trip_id.split('_').nth(1).unwrap_or(trip_id)
}

/// Route-direction segment: text after the last underscore, e.g. `1..S03R`.
pub fn route_direction(trip_id: &str) -> &str {
    trip_id.rsplit('_').next().unwrap_or(trip_id)
}

/// Line of a route-direction segment, e.g. `1` for `1..S03R`.
pub fn line_of(route_direction: &str) -> &str {
    route_direction.split('.').next().unwrap_or(route_direction)
}

/// Direction letter of a route-direction segment, e.g. `S` for `1..S03R`.
pub fn direction_of(route_direction: &str) -> Option<char> {
    route_direction
        .split_once("..")
        .and_then(|(_, rest)| rest.chars().next())
}
