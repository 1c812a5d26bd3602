// REST repository - diagrams, sensor states and virtual sensors on the backend API
use crate::application::ports::{DiagramRepository, SensorStateRepository, VirtualSensorRepository};
use crate::domain::diagram::{DiagramGroup, DiagramModel, DiagramType};
use crate::domain::reading::RawRecord;
use crate::domain::virtual_sensor::{VirtualSensorRecord, VirtualSensorSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct RestRepository {
    client: reqwest::Client,
    host: String,
    token: String,
    id_enterprise: String,
}

/// Stored diagrams come back either as a full document or as a bare group list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DiagramPayload {
    Model(DiagramModel),
    Wrapped { data: Vec<DiagramGroup> },
    Groups(Vec<DiagramGroup>),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SensorCheckRequest<'a> {
    sensor_id: &'a str,
    id_enterprise: &'a str,
}

#[derive(Debug, Deserialize)]
struct SensorCheckResponse {
    #[serde(default)]
    exists: bool,
}

impl RestRepository {
    pub fn new(host: String, token: String, id_enterprise: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            token,
            id_enterprise,
        }
    }

    fn diagram_query(&self, machine_id: &str, diagram_type: DiagramType) -> String {
        format!(
            "idEnterprise={}&idMachine={}&typeIHM={}",
            urlencoding::encode(&self.id_enterprise),
            urlencoding::encode(machine_id),
            diagram_type.as_str()
        )
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Accept", "application/json");
        if self.token.is_empty() {
            request
        } else {
            request.bearer_auth(&self.token)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} request failed with status {}: {}", what, status, body);
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, what: &str) -> Result<T> {
        self.send(request, what)
            .await?
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }
}

fn decode_diagram(
    body: &str,
    machine_id: &str,
    diagram_type: DiagramType,
) -> Result<Option<DiagramModel>> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let payload: Option<DiagramPayload> =
        serde_json::from_str(body).context("Failed to parse diagram")?;
    Ok(payload.map(|payload| match payload {
        DiagramPayload::Model(model) => model,
        DiagramPayload::Wrapped { data: groups } | DiagramPayload::Groups(groups) => DiagramModel {
            machine_id: machine_id.to_string(),
            diagram_type,
            groups,
        },
    }))
}

#[async_trait]
impl DiagramRepository for RestRepository {
    async fn load(&self, machine_id: &str, diagram_type: DiagramType) -> Result<Option<DiagramModel>> {
        let url = format!(
            "{}/remote-ihm/machine?{}",
            self.host,
            self.diagram_query(machine_id, diagram_type)
        );
        let body = self
            .send(self.client.get(&url), "diagram load")
            .await?
            .text()
            .await
            .context("Failed to read diagram body")?;
        decode_diagram(&body, machine_id, diagram_type)
    }

    async fn save(&self, model: &DiagramModel) -> Result<()> {
        let url = format!(
            "{}/remote-ihm/?{}",
            self.host,
            self.diagram_query(&model.machine_id, model.diagram_type)
        );
        self.send(self.client.post(&url).json(model), "diagram save")
            .await?;
        tracing::debug!(
            "Saved {} diagram of {}",
            model.diagram_type.as_str(),
            model.machine_id
        );
        Ok(())
    }
}

#[async_trait]
impl SensorStateRepository for RestRepository {
    async fn last_states(&self, machine_id: &str, sensor_ids: &[String]) -> Result<Vec<RawRecord>> {
        let mut query = format!("idMachines[]={}", urlencoding::encode(machine_id));
        for sensor_id in sensor_ids {
            query.push_str(&format!("&sensors[]={}", urlencoding::encode(sensor_id)));
        }
        let url = format!("{}/sensorstate/last/machines/sensors?{}", self.host, query);
        self.json(self.client.get(&url), "last sensor state").await
    }
}

#[async_trait]
impl VirtualSensorRepository for RestRepository {
    async fn list(&self, machine_id: &str) -> Result<Vec<VirtualSensorRecord>> {
        let url = format!(
            "{}/virtual-sensors?idMachine={}",
            self.host,
            urlencoding::encode(machine_id)
        );
        self.json(self.client.get(&url), "virtual sensor list").await
    }

    async fn create(&self, spec: &VirtualSensorSpec) -> Result<()> {
        let url = format!("{}/virtual-sensors", self.host);
        self.send(self.client.post(&url).json(spec), "virtual sensor save")
            .await?;
        Ok(())
    }

    async fn delete(&self, sensor_id: &str) -> Result<()> {
        let url = format!(
            "{}/virtual-sensors/{}",
            self.host,
            urlencoding::encode(sensor_id)
        );
        self.send(self.client.delete(&url), "virtual sensor delete")
            .await?;
        Ok(())
    }

    async fn sensor_exists(&self, sensor_id: &str, id_enterprise: &str) -> Result<bool> {
        let url = format!("{}/sensor/check", self.host);
        let body = SensorCheckRequest {
            sensor_id,
            id_enterprise,
        };
        let response: SensorCheckResponse = self
            .json(self.client.post(&url).json(&body), "sensor check")
            .await?;
        Ok(response.exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::diagram::SlotType;

    #[test]
    fn test_diagram_query_encodes_ids() {
        let repository = RestRepository::new("http://api/".into(), String::new(), "E 1".into());
        assert_eq!(repository.host, "http://api");
        assert_eq!(
            repository.diagram_query("M/1", DiagramType::BowThruster),
            "idEnterprise=E%201&idMachine=M%2F1&typeIHM=BOW_THRUSTER"
        );
    }

    #[test]
    fn test_decode_full_document() {
        let body = r#"{"idMachine":"M1","typeIHM":"PMS","groups":[
            {"key":"g1","index":1,"label":"G1","sensors":[
                {"typeSensor":"TEMPERATURE","index":1,"idSensor":"T1","sizeDecimals":1},
                {"typeSensor":"STATUS","idSensor":"0"}
            ]}]}"#;
        let model = decode_diagram(body, "M1", DiagramType::Pms).unwrap().unwrap();
        let group = model.group("g1").unwrap();
        assert_eq!(
            group.slot(SlotType::Temperature, 1).unwrap().sensor_id.as_deref(),
            Some("T1")
        );
        assert_eq!(group.slot(SlotType::Status, 1).unwrap().sensor_id, None);
    }

    #[test]
    fn test_decode_bare_groups_and_empty_bodies() {
        let model = decode_diagram(
            r#"{"data":[{"key":"g1","sensors":[]}]}"#,
            "M1",
            DiagramType::Azimutal,
        )
        .unwrap()
        .unwrap();
        assert_eq!(model.machine_id, "M1");
        assert_eq!(model.diagram_type, DiagramType::Azimutal);

        let model = decode_diagram(r#"[{"key":"g1"}]"#, "M1", DiagramType::Pms)
            .unwrap()
            .unwrap();
        assert_eq!(model.groups.len(), 1);

        assert!(decode_diagram("", "M1", DiagramType::Pms).unwrap().is_none());
        assert!(decode_diagram("null", "M1", DiagramType::Pms).unwrap().is_none());
    }
}
