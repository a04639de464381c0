//! GPX 1.1 export.
//!
//! Fields a track did not record are left out rather than written as zero.
//! Distance, heart rate and heading go into `gpxdata` extensions.
//! Each lap closes the current segment and is also written as a waypoint.

use gpspod_pmem::{Lap, LapEvent, Sample, Timestamp, TrackHeader};
use tracing::warn;

const GPX_NS: &str = "http://www.topografix.com/GPX/1/1";
const GPXDATA_NS: &str = "http://www.cluetrust.com/XML/GPXDATA/1/0";
const SCHEMA_LOCATION: &str = "http://www.topografix.com/GPX/1/1 \
    http://www.topografix.com/GPX/1/1/gpx.xsd \
    http://www.cluetrust.com/XML/GPXDATA/1/0 \
    http://www.cluetrust.com/Schemas/gpxdata10.xsd";

/// Render one track as a GPX document.
pub fn to_gpx(header: &TrackHeader, samples: &[Sample], laps: &[Lap]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<gpx version=\"1.1\" creator=\"gpspod {}\" xmlns=\"{GPX_NS}\" \
         xmlns:gpxdata=\"{GPXDATA_NS}\" \
         xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
         xsi:schemaLocation=\"{SCHEMA_LOCATION}\">\n",
        env!("CARGO_PKG_VERSION")
    ));
    let mut breaks = Vec::new();
    for (number, lap) in laps.iter().enumerate() {
        let Some(sample) = samples.get(lap.sample_index as usize) else {
            warn!(sample = lap.sample_index, "lap past the last sample");
            continue;
        };
        write_waypoint(&mut out, &header.start, sample, lap.event, number + 1);
        breaks.push(lap.sample_index as usize);
    }
    breaks.sort_unstable();
    breaks.dedup();

    out.push_str("  <trk>\n");
    out.push_str(&format!(
        "    <name>{}</name>\n",
        header.start.format("Track %Y-%m-%d %H:%M:%S")
    ));
    out.push_str("    <trkseg>\n");
    let mut breaks = breaks.into_iter().peekable();
    for (i, sample) in samples.iter().enumerate() {
        write_point(&mut out, &header.start, sample);
        if breaks.next_if_eq(&i).is_some() && i + 1 < samples.len() {
            out.push_str("    </trkseg>\n    <trkseg>\n");
        }
    }
    out.push_str("    </trkseg>\n");
    out.push_str("  </trk>\n");
    out.push_str("</gpx>\n");
    out
}

fn write_point(out: &mut String, start: &Timestamp, sample: &Sample) {
    out.push_str(&format!(
        "      <trkpt lat=\"{:.7}\" lon=\"{:.7}\">\n",
        sample.latitude_deg(),
        sample.longitude_deg()
    ));
    out.push_str(&format!("        <ele>{}</ele>\n", sample.altitude));
    out.push_str(&format!(
        "        <time>{}</time>\n",
        sample_time(start, sample.time_offset_ms)
    ));
    if let Some(speed) = sample.speed_mps() {
        out.push_str(&format!("        <speed>{speed:.3}</speed>\n"));
    }
    if let Some(ehpe) = sample.ehpe {
        out.push_str(&format!("        <hdop>{ehpe}</hdop>\n"));
    }

    let mut extensions = Vec::new();
    if let Some(distance) = sample.distance {
        extensions.push(format!("<gpxdata:distance>{distance}</gpxdata:distance>"));
    }
    if let Some(hr) = sample.heartrate {
        extensions.push(format!("<gpxdata:hr>{hr}</gpxdata:hr>"));
    }
    if let Some(heading) = sample.heading_deg() {
        extensions.push(format!("<gpxdata:heading>{heading:.3}</gpxdata:heading>"));
    }
    if !extensions.is_empty() {
        out.push_str("        <extensions>\n");
        for ext in extensions {
            out.push_str(&format!("          {ext}\n"));
        }
        out.push_str("        </extensions>\n");
    }
    out.push_str("      </trkpt>\n");
}

fn write_waypoint(out: &mut String, start: &Timestamp, sample: &Sample, event: LapEvent, number: usize) {
    out.push_str(&format!(
        "  <wpt lat=\"{:.7}\" lon=\"{:.7}\">\n",
        sample.latitude_deg(),
        sample.longitude_deg()
    ));
    out.push_str(&format!("    <ele>{}</ele>\n", sample.altitude));
    out.push_str(&format!(
        "    <time>{}</time>\n",
        sample_time(start, sample.time_offset_ms)
    ));
    let tag = match event {
        LapEvent::Manual => {
            let pressed = Timestamp::from_unix(start.to_unix() + i64::from(sample.time_offset_ms / 1000));
            out.push_str(&format!("    <name>Manual waypoint {number}</name>\n"));
            out.push_str(&format!(
                "    <cmt>{}</cmt>\n",
                pressed.format("Button press at %Y-%m-%d %H:%M:%S")
            ));
            "lap_manual"
        }
        LapEvent::Other(_) => {
            out.push_str(&format!("    <name>Lap {number}</name>\n"));
            "unknown"
        }
    };
    out.push_str(&format!(
        "    <extensions>\n      <gpxdata:event>{tag}</gpxdata:event>\n    </extensions>\n"
    ));
    out.push_str("  </wpt>\n");
}

/// ISO-8601 UTC time of a sample; milliseconds are shown only when nonzero.
fn sample_time(start: &Timestamp, offset_ms: u32) -> String {
    let time = Timestamp::from_unix(start.to_unix() + i64::from(offset_ms / 1000));
    match offset_ms % 1000 {
        0 => time.to_string(),
        ms => {
            let text = time.to_string();
            let base = text.trim_end_matches('Z');
            format!("{base}.{ms:03}Z")
        }
    }
}

#[cfg(test)]
mod tests {
    use gpspod_pmem::{TrackFormat, END_OF_CHAIN};

    use super::*;

    fn header() -> TrackHeader {
        TrackHeader {
            offset: 0xF_FC40,
            format: TrackFormat::all(),
            next: END_OF_CHAIN,
            start: Timestamp {
                year: 2016,
                month: 12,
                day: 31,
                hour: 23,
                minute: 59,
                second: 59,
            },
            sample_count: 2,
            log_interval: 1,
            lap_count: 0,
            distance: 3,
        }
    }

    fn sample(time_offset_ms: u32) -> Sample {
        Sample {
            time_offset_ms,
            latitude: 521_234_567,
            longitude: -1_000_000,
            altitude: 12,
            heading: Some(18_000),
            speed: Some(150),
            heartrate: Some(120),
            ehpe: Some(5),
            distance: Some(3),
        }
    }

    #[test]
    fn points_in_order_with_extensions() {
        let gpx = to_gpx(&header(), &[sample(0), sample(1500)], &[]);
        assert!(gpx.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<gpx version=\"1.1\""));
        assert!(gpx.contains("<name>Track 2016-12-31 23:59:59</name>"));
        assert_eq!(gpx.matches("<trkpt ").count(), 2);
        assert_eq!(gpx.matches("<trkseg>").count(), 1);

        let first = gpx.find("<time>2016-12-31T23:59:59Z</time>").expect("first time");
        let second = gpx
            .find("<time>2017-01-01T00:00:00.500Z</time>")
            .expect("second time rolls over the year");
        assert!(first < second);

        assert!(gpx.contains("<trkpt lat=\"52.1234567\" lon=\"-0.1000000\">"));
        assert!(gpx.contains("<ele>12</ele>"));
        assert!(gpx.contains("<speed>1.500</speed>"));
        assert!(gpx.contains("<hdop>5</hdop>"));
        assert!(gpx.contains("<gpxdata:distance>3</gpxdata:distance>"));
        assert!(gpx.contains("<gpxdata:hr>120</gpxdata:hr>"));
        assert!(gpx.contains("<gpxdata:heading>180.000</gpxdata:heading>"));
        assert!(gpx.trim_end().ends_with("</gpx>"));
    }

    #[test]
    fn missing_fields_are_omitted() {
        let bare = Sample {
            heading: None,
            speed: None,
            heartrate: None,
            ehpe: None,
            distance: None,
            ..sample(0)
        };
        let gpx = to_gpx(&header(), &[bare], &[]);
        assert!(!gpx.contains("<speed>"));
        assert!(!gpx.contains("<hdop>"));
        assert!(!gpx.contains("<extensions>"));
        assert!(gpx.contains("<ele>12</ele>"));
    }

    #[test]
    fn empty_track_has_empty_segment() {
        let gpx = to_gpx(&header(), &[], &[]);
        assert!(gpx.contains("<trkseg>\n    </trkseg>"));
        assert_eq!(gpx.matches("<trkpt").count(), 0);
    }

    #[test]
    fn laps_split_segments_and_become_waypoints() {
        let samples: Vec<Sample> = (0..4).map(|i| sample(i * 1000)).collect();
        let laps = [
            Lap {
                sample_index: 1,
                event: LapEvent::Manual,
            },
            Lap {
                sample_index: 1,
                event: LapEvent::Other(7),
            },
            Lap {
                sample_index: 3,
                event: LapEvent::Manual,
            },
            Lap {
                sample_index: 10,
                event: LapEvent::Manual,
            },
        ];
        let gpx = to_gpx(&header(), &samples, &laps);

        // the lap at the last sample adds no empty segment
        assert_eq!(gpx.matches("<trkseg>").count(), 2);
        assert_eq!(gpx.matches("<trkpt ").count(), 4);
        assert_eq!(gpx.matches("<wpt ").count(), 3);
        assert!(gpx.find("</wpt>").unwrap() < gpx.find("<trk>").unwrap());
        assert!(gpx.contains("<name>Manual waypoint 1</name>"));
        assert!(gpx.contains("<cmt>Button press at 2017-01-01 00:00:00</cmt>"));
        assert!(gpx.contains("<name>Lap 2</name>"));
        assert!(gpx.contains("<name>Manual waypoint 3</name>"));
        assert_eq!(gpx.matches("<gpxdata:event>lap_manual</gpxdata:event>").count(), 2);
        assert_eq!(gpx.matches("<gpxdata:event>unknown</gpxdata:event>").count(), 1);

        let split = gpx.find("</trkseg>\n    <trkseg>").expect("segment break");
        let second_point = gpx.find("<time>2017-01-01T00:00:00Z</time>\n").unwrap();
        let third_point = gpx.find("<time>2017-01-01T00:00:01Z</time>\n        <speed>").unwrap();
        assert!(second_point < split && split < third_point);
    }
}
