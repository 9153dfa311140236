// Resolve a live trip to its scheduled stop sequence.
//
// Feed trip ids are not stable across line-groups, so matching walks a fixed
// chain and stops at the first hit:
//
// 1. a static trip whose long id contains the live trip id;
// 2. static trips whose long id contains the live short id, preferring one
//    that serves the live trip's soonest stop;
// 3. a static trip serving the vehicle's current stop, preferring the live
//    trip's line when the feed names one.
//
// Every step scans the static table in trip-id order, so the same input
// always produces the same match.

use log::debug;
use std::collections::BTreeMap;

use crate::feed::TripRecord;
use crate::ids;
use crate::schedule::StaticRoute;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    FullId,
    ShortIdWithStop,
    ShortId,
    CurrentStop,
}

#[derive(Debug, Clone, Copy)]
pub struct TripMatch<'a> {
    pub route: &'a StaticRoute,
    pub rule: MatchRule,
}

pub fn match_trip<'a>(
    record: &TripRecord,
    routes: &'a BTreeMap<String, StaticRoute>,
) -> Option<TripMatch<'a>> {
    if let Some(route) = routes.values().find(|r| r.long_trip_id.contains(&record.trip_id)) {
        return Some(TripMatch { route, rule: MatchRule::FullId });
    }

    let candidates: Vec<&StaticRoute> = routes
        .values()
        .filter(|r| r.long_trip_id.contains(&record.short_trip_id))
        .collect();

    if !candidates.is_empty() {
        if let Some(first) = record.first_stop() {
            if let Some(route) = candidates.iter().copied().find(|r| r.contains_stop(&first.stop_id)) {
                return Some(TripMatch { route, rule: MatchRule::ShortIdWithStop });
            }
        }
        return Some(TripMatch { route: candidates[0], rule: MatchRule::ShortId });
    }

    if let Some(parent) = record.parent_stop() {
        let line = record.route_id.as_deref();
        let serving = || routes.values().filter(|r| r.contains_stop(parent));
        let route = serving()
            .find(|r| line == Some(ids::line_of(&r.route_id)))
            .or_else(|| serving().next());
        if let Some(route) = route {
            return Some(TripMatch { route, rule: MatchRule::CurrentStop });
        }
    }

    debug!("No static trip matches live trip {}", record.trip_id);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{StopTimeUpdate, VehicleReport, VehicleStatus};
    use crate::schedule::ScheduledStop;

    fn route(long_id: &str, stops: &[&str]) -> StaticRoute {
        StaticRoute::new(
            long_id,
            stops
                .iter()
                .map(|s| ScheduledStop { stop_id: s.to_string(), scheduled_time: None })
                .collect(),
        )
    }

    fn table(routes: Vec<StaticRoute>) -> BTreeMap<String, StaticRoute> {
        routes.into_iter().map(|r| (r.long_trip_id.clone(), r)).collect()
    }

    fn live(trip_id: &str, first_stop: Option<&str>, parent: Option<&str>) -> TripRecord {
        let mut record = TripRecord::new(trip_id, "ACE");
        if let Some(stop) = first_stop {
            record.stop_time_updates = vec![StopTimeUpdate { stop_id: stop.into(), time: 100 }];
        }
        if let Some(stop) = parent {
            record.vehicle = Some(VehicleReport {
                parent_stop_id: Some(stop.into()),
                timestamp: None,
                current_stop_sequence: None,
                status: VehicleStatus::Unknown,
            });
        }
        record
    }

    #[test]
    fn test_full_id_containment_wins() {
        let routes = table(vec![
            route("AAA_073550_A..S", &["A02S"]),
            route("BBB_073550_A..S55R", &["A03S"]),
        ]);
        let m = match_trip(&live("073550_A..S55R", Some("A02S"), None), &routes).unwrap();
        assert_eq!(m.rule, MatchRule::FullId);
        assert_eq!(m.route.long_trip_id, "BBB_073550_A..S55R");
    }

    #[test]
    fn test_short_id_disambiguated_by_first_stop() {
        let routes = table(vec![
            route("SAT_000600_A..N", &["A55N", "A54N"]),
            route("WKD_000600_A..N", &["A09N", "A07N"]),
        ]);
        // short id of "X_A..N" is "A..N", which both static trips contain
        let record = live("X_A..N", Some("A07N"), None);

        for _ in 0..5 {
            let m = match_trip(&record, &routes).unwrap();
            assert_eq!(m.rule, MatchRule::ShortIdWithStop);
            assert_eq!(m.route.long_trip_id, "WKD_000600_A..N");
        }
    }

    #[test]
    fn test_short_id_without_stop_takes_first_candidate() {
        let routes = table(vec![
            route("WKD_000600_A..N", &["A09N"]),
            route("SAT_000600_A..N", &["A55N"]),
        ]);
        let m = match_trip(&live("X_A..N", Some("Q01N"), None), &routes).unwrap();
        assert_eq!(m.rule, MatchRule::ShortId);
        assert_eq!(m.route.long_trip_id, "SAT_000600_A..N");
    }

    #[test]
    fn test_current_stop_fallback_prefers_same_line() {
        let routes = table(vec![
            route("WKD_000100_1..S03R", &["101S", "102S"]),
            route("WKD_000200_2..S01R", &["102S", "103S"]),
        ]);
        let mut record = live("999999", None, Some("102S"));
        record.route_id = Some("2".into());
        let m = match_trip(&record, &routes).unwrap();
        assert_eq!(m.rule, MatchRule::CurrentStop);
        assert_eq!(m.route.long_trip_id, "WKD_000200_2..S01R");

        let m = match_trip(&live("999999", None, Some("102S")), &routes).unwrap();
        assert_eq!(m.route.long_trip_id, "WKD_000100_1..S03R");
    }

    #[test]
    fn test_no_match() {
        let routes = table(vec![route("WKD_000100_1..S03R", &["101S"])]);
        assert!(match_trip(&live("555555_Z..N", Some("Z01N"), Some("Z01N")), &routes).is_none());
    }
}
