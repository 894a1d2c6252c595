//! GeoJSON vector output.
//!
//! One `FeatureCollection` per image. The source CRS identifier is copied verbatim into the
//! collection's `crs` member; coordinates are not reprojected.

use crate::aggregate::{GeoFeature, ImageResult};
use crate::error::PipelineError;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn feature(geo: &GeoFeature) -> Feature {
    let mut ring: Vec<Vec<f64>> = geo.polygon.points().iter().map(|p| vec![p.x, p.y]).collect();
    ring.push(ring[0].clone());
    let mut properties = JsonObject::new();
    properties.insert("Class".to_string(), json!(geo.class_name));
    properties.insert("Score".to_string(), json!(geo.confidence));
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Builds the collection for one image. An empty result is still a valid, empty collection.
pub fn feature_collection(result: &ImageResult) -> FeatureCollection {
    let mut members = JsonObject::new();
    members.insert("name".to_string(), json!(result.raster.base_name()));
    members.insert(
        "crs".to_string(),
        json!({ "type": "name", "properties": { "name": result.raster.crs } }),
    );
    FeatureCollection {
        bbox: None,
        features: result.geometry_set.iter().map(feature).collect(),
        foreign_members: Some(members),
    }
}

pub fn write_geojson<W: Write>(result: &ImageResult, writer: W) -> Result<(), serde_json::Error> {
    serde_json::to_writer_pretty(writer, &feature_collection(result))
}

pub fn save_geojson(result: &ImageResult, path: &Path) -> Result<(), PipelineError> {
    let file = File::create(path).map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    write_geojson(result, &mut writer).map_err(|e| PipelineError::json(path, e))?;
    writer.flush().map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::RasterInfo;
    use crate::annotations::detection::Detection;
    use crate::annotations::point::Point;
    use crate::annotations::polygon::Quad;
    use crate::raster::affine::GeoTransform;
    use serde_json::Value as Json;
    use std::path::PathBuf;

    fn info() -> RasterInfo {
        RasterInfo {
            source_path: PathBuf::from("harbour.tif"),
            width: 100,
            height: 100,
            transform: GeoTransform::new(1.0, 0.0, 1000.0, 0.0, -1.0, 2000.0),
            crs: "EPSG:32650".to_string(),
        }
    }

    fn to_value(result: &ImageResult) -> Json {
        let mut buf = Vec::new();
        write_geojson(result, &mut buf).unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[test]
    fn empty_result_is_valid_collection() {
        let value = to_value(&ImageResult::from_detections(info(), vec![]));
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["crs"]["properties"]["name"], "EPSG:32650");
        assert_eq!(value["features"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn features_carry_attributes_and_closed_rings() {
        let detection = Detection::new(
            "ship".to_string(),
            0.75,
            Quad::from_corners(Point::new(10.0, 20.0), Point::new(14.0, 22.0)),
        );
        let value = to_value(&ImageResult::from_detections(info(), vec![detection]));
        let feature = &value["features"][0];
        assert_eq!(feature["properties"]["Class"], "ship");
        assert_eq!(feature["properties"]["Score"].as_f64().unwrap(), 0.75);
        assert_eq!(feature["geometry"]["type"], "Polygon");
        let ring = feature["geometry"]["coordinates"][0].as_array().unwrap();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[0], ring[4]);
        assert_eq!(ring[0][0].as_f64().unwrap(), 1010.5);
        assert_eq!(ring[0][1].as_f64().unwrap(), 1979.5);
    }

    #[test]
    fn output_parses_as_typed_collection() {
        let detection = Detection::new(
            "ship".to_string(),
            0.5,
            Quad::from_corners(Point::new(0.0, 0.0), Point::new(3.0, 3.0)),
        );
        let mut buf = Vec::new();
        write_geojson(&ImageResult::from_detections(info(), vec![detection]), &mut buf).unwrap();
        let collection: FeatureCollection = serde_json::from_slice(&buf).unwrap();
        assert_eq!(collection.features.len(), 1);
        let geometry = collection.features[0].geometry.as_ref().unwrap();
        assert!(matches!(&geometry.value, Value::Polygon(rings) if rings[0].len() == 5));
        let members = collection.foreign_members.unwrap();
        assert_eq!(members["crs"]["properties"]["name"], "EPSG:32650");
    }

    #[test]
    fn saves_to_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.geojson");
        save_geojson(&ImageResult::from_detections(info(), vec![]), &path).unwrap();
        let value: Json = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["name"], "harbour");
    }
}
