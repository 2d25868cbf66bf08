use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Adapter, Manager, Peripheral},
};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{Result, WorkoutError},
    sensor::{NotificationStream, RepTransport},
    types::ConnectionParams,
    REP_CHAR_UUID, REP_SERVICE_UUID,
};

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| WorkoutError::InvalidParameters(format!("Invalid UUID {value}: {e}")))
}

/// Discovered rep counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCounter {
    /// Platform device id (address on most platforms)
    pub device_id: String,
    /// Advertised name
    pub name: Option<String>,
    /// Signal strength
    pub rssi: i16,
}

/// Rep counter transport over Bluetooth Low Energy
pub struct BleRepTransport {
    adapter: Adapter,
    params: ConnectionParams,
    service_uuid: Uuid,
    char_uuid: Uuid,
    peripheral: Option<Peripheral>,
    rep_char: Option<Characteristic>,
}

impl BleRepTransport {
    /// Use the first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::Ble`] if the Bluetooth stack cannot be initialized,
    /// or [`WorkoutError::DeviceNotFound`] if no adapter is present.
    pub async fn new(params: ConnectionParams) -> Result<Self> {
        let service_uuid = parse_uuid(REP_SERVICE_UUID)?;
        let char_uuid = parse_uuid(REP_CHAR_UUID)?;

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(WorkoutError::DeviceNotFound)?;

        Ok(Self {
            adapter,
            params,
            service_uuid,
            char_uuid,
            peripheral: None,
            rep_char: None,
        })
    }

    /// Scan for rep counters, strongest signal first
    ///
    /// # Errors
    ///
    /// Returns [`WorkoutError::Ble`] for Bluetooth failures while scanning.
    pub async fn scan(&self) -> Result<Vec<DiscoveredCounter>> {
        Ok(self
            .scan_peripherals()
            .await?
            .into_iter()
            .map(|(_, counter)| counter)
            .collect())
    }

    async fn scan_peripherals(&self) -> Result<Vec<(Peripheral, DiscoveredCounter)>> {
        info!("Scanning for rep counters...");

        // unfiltered so counters that only advertise a name are found too
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_millis(self.params.scan_timeout_ms)).await;
        self.adapter.stop_scan().await?;

        let mut found = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if let Some(counter) = self.describe(&peripheral).await {
                debug!("Found rep counter {} ({:?})", counter.device_id, counter.name);
                found.push((peripheral, counter));
            }
        }

        found.sort_by(|(_, a), (_, b)| b.rssi.cmp(&a.rssi));
        info!("Scan completed. Found {} rep counter(s)", found.len());
        Ok(found)
    }

    /// Accept peripherals advertising the rep service or the configured name prefix
    async fn describe(&self, peripheral: &Peripheral) -> Option<DiscoveredCounter> {
        let properties = peripheral.properties().await.ok().flatten()?;

        let advertises_service = properties.services.contains(&self.service_uuid);
        let name_matches = properties
            .local_name
            .as_ref()
            .is_some_and(|name| name.starts_with(&self.params.device_name_prefix));

        if !advertises_service && !name_matches {
            return None;
        }

        Some(DiscoveredCounter {
            device_id: peripheral.id().to_string(),
            name: properties.local_name,
            rssi: properties.rssi.unwrap_or(i16::MIN),
        })
    }

    async fn select_peripheral(&mut self) -> Result<Peripheral> {
        if let Some(peripheral) = &self.peripheral {
            return Ok(peripheral.clone());
        }

        let mut found = self.scan_peripherals().await?;
        if found.is_empty() {
            return Err(WorkoutError::DeviceNotFound);
        }

        let position = self
            .params
            .preferred_device_id
            .as_ref()
            .and_then(|preferred| found.iter().position(|(_, c)| &c.device_id == preferred))
            .unwrap_or(0);
        let (peripheral, counter) = found.swap_remove(position);

        info!("Selected rep counter {} (rssi {})", counter.device_id, counter.rssi);
        self.peripheral = Some(peripheral.clone());
        Ok(peripheral)
    }

    fn rep_characteristic(&self, peripheral: &Peripheral) -> Result<Characteristic> {
        peripheral
            .services()
            .iter()
            .find(|s| s.uuid == self.service_uuid)
            .ok_or_else(|| WorkoutError::Protocol("Rep service not found".to_string()))?
            .characteristics
            .iter()
            .find(|c| c.uuid == self.char_uuid)
            .cloned()
            .ok_or_else(|| WorkoutError::Protocol("Rep characteristic not found".to_string()))
    }

    fn connected_parts(&self) -> Result<(&Peripheral, &Characteristic)> {
        match (&self.peripheral, &self.rep_char) {
            (Some(peripheral), Some(characteristic)) => Ok((peripheral, characteristic)),
            _ => Err(WorkoutError::Disconnected),
        }
    }
}

#[async_trait]
impl RepTransport for BleRepTransport {
    async fn connect(&mut self) -> Result<String> {
        let peripheral = self.select_peripheral().await?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            timeout(
                Duration::from_millis(self.params.timeout_ms),
                peripheral.connect(),
            )
            .await
            .map_err(|_| WorkoutError::Timeout {
                timeout_ms: self.params.timeout_ms,
            })?
            .map_err(|e| WorkoutError::ConnectionFailed(e.to_string()))?;
        }

        peripheral.discover_services().await?;
        self.rep_char = Some(self.rep_characteristic(&peripheral)?);

        let device_id = peripheral.id().to_string();
        info!("Connected to rep counter {}", device_id);
        Ok(device_id)
    }

    async fn subscribe(&mut self) -> Result<NotificationStream> {
        let (peripheral, characteristic) = self.connected_parts()?;
        let rep_uuid: Uuid = characteristic.uuid;

        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(characteristic).await?;

        Ok(notifications
            .filter_map(move |n| async move {
                (n.uuid == rep_uuid).then(|| Bytes::from(n.value))
            })
            .boxed())
    }

    async fn write(&mut self, data: Bytes) -> Result<()> {
        let (peripheral, characteristic) = self.connected_parts()?;
        debug!("Writing to rep counter: {:02X?}", data.as_ref());

        peripheral
            .write(characteristic, &data, WriteType::WithoutResponse)
            .await
            .map_err(|e| WorkoutError::Protocol(format!("Failed to write command: {e}")))
    }

    async fn is_connected(&self) -> bool {
        match &self.peripheral {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        let (peripheral, characteristic) = self.connected_parts()?;
        peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.rep_char = None;
        if let Some(peripheral) = &self.peripheral {
            if peripheral.is_connected().await.unwrap_or(false) {
                peripheral.disconnect().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatt_uuids_parse() {
        let service = parse_uuid(REP_SERVICE_UUID).unwrap();
        let characteristic = parse_uuid(REP_CHAR_UUID).unwrap();

        assert_eq!(service.to_string(), "0000ffe0-0000-1000-8000-00805f9b34fb");
        assert_eq!(
            characteristic.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
        assert!(matches!(
            parse_uuid("not-a-uuid"),
            Err(WorkoutError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_default_discovery_prefix() {
        let params = ConnectionParams::default();
        assert!("RepCounter-42".starts_with(&params.device_name_prefix));
    }
}
