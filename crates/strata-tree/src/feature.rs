use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_store::{ObjectKind, StoredObject};
use strata_types::{ContentHasher, FieldType, Geometry, ObjectId, Value};

use crate::error::{TreeError, TreeResult};

/// Feature payload: attribute values in the order of the feature type's
/// attribute descriptors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RevFeature {
    values: Vec<Value>,
}

impl RevFeature {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value of the type's geometry attribute, if it holds a geometry.
    pub fn geometry(&self, feature_type: &FeatureType) -> Option<&Geometry> {
        let (index, _) = feature_type.geometry_attribute()?;
        self.get(index)?.as_geometry()
    }

    /// The value of the named geometry attribute, if it holds a geometry.
    pub fn geometry_named(&self, feature_type: &FeatureType, name: &str) -> Option<&Geometry> {
        let (index, _) = feature_type.geometry_attribute_named(name)?;
        self.get(index)?.as_geometry()
    }

    /// Look up a value by attribute name.
    pub fn attribute(&self, feature_type: &FeatureType, name: &str) -> Option<&Value> {
        self.get(feature_type.attribute_index(name)?)
    }

    pub fn encode(&self) -> TreeResult<Vec<u8>> {
        encode("feature", self)
    }

    pub fn decode(id: ObjectId, data: &[u8]) -> TreeResult<Self> {
        decode("feature", id, data)
    }

    /// Id and stored form; the id is a hash over the encoded bytes.
    pub fn to_object(&self) -> TreeResult<(ObjectId, StoredObject)> {
        let data = self.encode()?;
        Ok((ContentHasher::FEATURE.hash(&data), StoredObject::new(ObjectKind::Feature, data)))
    }

    pub fn id(&self) -> TreeResult<ObjectId> {
        Ok(ContentHasher::FEATURE.hash(&self.encode()?))
    }
}

/// Name and type of one feature attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Schema shared by many features, referenced from node metadata ids.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureType {
    name: String,
    attributes: Vec<AttributeDescriptor>,
}

impl FeatureType {
    pub fn new(name: impl Into<String>, attributes: Vec<AttributeDescriptor>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn attribute_index(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// The first geometry-typed attribute.
    pub fn geometry_attribute(&self) -> Option<(usize, &AttributeDescriptor)> {
        self.attributes
            .iter()
            .enumerate()
            .find(|(_, a)| a.field_type == FieldType::Geometry)
    }

    /// The attribute called `name`, if it is geometry-typed.
    pub fn geometry_attribute_named(&self, name: &str) -> Option<(usize, &AttributeDescriptor)> {
        let index = self.attribute_index(name)?;
        let descriptor = &self.attributes[index];
        (descriptor.field_type == FieldType::Geometry).then_some((index, descriptor))
    }

    pub fn encode(&self) -> TreeResult<Vec<u8>> {
        encode("feature type", self)
    }

    pub fn decode(id: ObjectId, data: &[u8]) -> TreeResult<Self> {
        decode("feature type", id, data)
    }

    pub fn to_object(&self) -> TreeResult<(ObjectId, StoredObject)> {
        let data = self.encode()?;
        Ok((
            ContentHasher::FEATURE_TYPE.hash(&data),
            StoredObject::new(ObjectKind::FeatureType, data),
        ))
    }

    pub fn id(&self) -> TreeResult<ObjectId> {
        Ok(ContentHasher::FEATURE_TYPE.hash(&self.encode()?))
    }
}

fn encode<T: Serialize>(kind: &'static str, value: &T) -> TreeResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| TreeError::Encode {
        kind,
        reason: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(kind: &'static str, id: ObjectId, data: &[u8]) -> TreeResult<T> {
    bincode::deserialize(data).map_err(|e| TreeError::Decode {
        kind,
        id,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roads() -> FeatureType {
        FeatureType::new(
            "roads",
            vec![
                AttributeDescriptor::new("name", FieldType::String),
                AttributeDescriptor::new("geom", FieldType::Geometry),
                AttributeDescriptor::new("lanes", FieldType::Int),
            ],
        )
    }

    fn main_street() -> RevFeature {
        RevFeature::new(vec![
            Value::from("Main St"),
            Value::from(Geometry::point(1.0, 2.0)),
            Value::Int(2),
        ])
    }

    #[test]
    fn geometry_and_attribute_lookup() {
        let ft = roads();
        let f = main_street();
        assert_eq!(ft.geometry_attribute().map(|(i, _)| i), Some(1));
        assert_eq!(f.geometry(&ft), Some(&Geometry::point(1.0, 2.0)));
        assert_eq!(f.attribute(&ft, "lanes"), Some(&Value::Int(2)));
        assert_eq!(f.attribute(&ft, "speed"), None);
    }

    #[test]
    fn no_geometry_attribute() {
        let ft = FeatureType::new("plain", vec![AttributeDescriptor::new("a", FieldType::Int)]);
        assert!(ft.geometry_attribute().is_none());
        assert!(RevFeature::new(vec![Value::Int(1)]).geometry(&ft).is_none());
    }

    #[test]
    fn named_geometry_lookup() {
        let ft = FeatureType::new(
            "parcels",
            vec![
                AttributeDescriptor::new("centroid", FieldType::Geometry),
                AttributeDescriptor::new("owner", FieldType::String),
                AttributeDescriptor::new("footprint", FieldType::Geometry),
            ],
        );
        let f = RevFeature::new(vec![
            Value::from(Geometry::point(0.0, 0.0)),
            Value::from("city"),
            Value::from(Geometry::point(5.0, 5.0)),
        ]);
        assert_eq!(ft.geometry_attribute_named("footprint").map(|(i, _)| i), Some(2));
        assert_eq!(f.geometry_named(&ft, "footprint"), Some(&Geometry::point(5.0, 5.0)));
        assert_eq!(f.geometry(&ft), Some(&Geometry::point(0.0, 0.0)));
        // not a geometry, or not there at all
        assert!(ft.geometry_attribute_named("owner").is_none());
        assert!(f.geometry_named(&ft, "area").is_none());
    }

    #[test]
    fn stored_form_roundtrips() {
        let f = main_street();
        let (id, obj) = f.to_object().unwrap();
        assert_eq!(obj.kind, ObjectKind::Feature);
        assert_eq!(id, f.id().unwrap());
        assert_eq!(RevFeature::decode(id, &obj.data).unwrap(), f);

        let ft = roads();
        let (ft_id, ft_obj) = ft.to_object().unwrap();
        assert_eq!(FeatureType::decode(ft_id, &ft_obj.data).unwrap(), ft);
    }

    #[test]
    fn feature_and_type_ids_use_separate_domains() {
        let empty_feature = RevFeature::default();
        let empty_type = FeatureType::new("", vec![]);
        assert_ne!(empty_feature.id().unwrap(), empty_type.id().unwrap());
    }

    #[test]
    fn corrupt_payload_is_a_decode_error() {
        let err = RevFeature::decode(ObjectId::NULL, &[0xFF; 3]).unwrap_err();
        assert!(matches!(err, TreeError::Decode { kind: "feature", .. }));
    }
}
