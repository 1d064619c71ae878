// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The virtual device engine: keeps the device container synchronized with
//! the configuration and builds the channels of each configured kind.

use crate::channels::{
  AnalogInputChannel, DimmerChannel, DoorSensorChannel, KeyChannel, MaintenanceChannel,
  PowerMeterChannel, SwitchChannel, TemperatureChannel, analog_receiver, counter, digital_input,
  dimmer, key_receiver, key_sender, power_meter, switch, switch_feedback, temperature, unreach,
};
use crate::device::{Container, Device, EventPublisher};
use crate::interface_list::add_to_interface_list;
use ccujack_config::{ChannelKind, Store, VirtualDeviceCfg};
use ccujack_core::errors::CcuJackResult;
use ccujack_mqtt::MqttServer;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Interface id of the CCU-Jack device layer.
pub const INTERFACE_ID: &str = "CCU-Jack";

/// Path to the interface list file on the CCU3.
const ITF_LIST_FILE: &str = "/etc/config/InterfacesList.xml";

/// XML-RPC path of the device layer. /RPC2 is already used for callbacks
/// from the interface processes.
pub const XMLRPC_PATH: &str = "/RPC3";

pub struct VirtualDevices {
  /// Store with the configuration.
  pub store: Arc<Store>,
  /// Publisher receiving value change events of all virtual devices.
  pub event_publisher: Arc<dyn EventPublisher>,
  /// Embedded MQTT server for the MQTT channel kinds.
  pub mqtt_server: Arc<MqttServer>,
  /// Container of the virtual devices.
  pub devices: Arc<Container>,
}

impl VirtualDevices {
  pub fn new(
    store: Arc<Store>,
    event_publisher: Arc<dyn EventPublisher>,
    mqtt_server: Arc<MqttServer>,
  ) -> Self {
    VirtualDevices {
      store,
      event_publisher,
      mqtt_server,
      devices: Container::new(),
    }
  }

  pub async fn start(&self) {
    info!("Starting virtual devices");
    // register the device layer in the interface list of the CCU
    let (ccu_address, http_port) = self
      .store
      .view(|cfg| (cfg.ccu.address.clone(), cfg.http.port));
    let itf_list = Path::new(ITF_LIST_FILE);
    if itf_list.exists() {
      let url = format!("xmlrpc://{ccu_address}:{http_port}{XMLRPC_PATH}");
      if let Err(err) = add_to_interface_list(itf_list, itf_list, INTERFACE_ID, &url, INTERFACE_ID)
      {
        error!("Adding CCU-Jack device layer to CCU interface list failed: {err}");
      }
    }
    // add configured devices
    self.synchronize_devices().await;
  }

  pub async fn stop(&self) {
    debug!("Shutting down virtual devices");
    self.devices.dispose().await;
  }

  /// Updates the device container based on the configuration: devices absent
  /// from the config are removed, missing ones are created.
  pub async fn synchronize_devices(&self) {
    let devcfgs: HashMap<String, VirtualDeviceCfg> =
      self.store.view(|cfg| cfg.virtual_devices.devices.clone());

    // delete non existing devices
    for dev in self.devices.devices() {
      let address = dev.address();
      if !devcfgs.contains_key(&address) {
        info!("Removing virtual device: {address}");
        if let Err(err) = self.devices.remove_device(&address).await {
          error!("Remove of virtual device {address} failed: {err}");
        }
      }
    }

    // add new devices
    for (address, devcfg) in devcfgs {
      if self.devices.device(&address).is_err() {
        info!(
          "Creating virtual device {} with {} channel(s)",
          devcfg.address,
          devcfg.channels.len()
        );
        if let Err(err) = self.create_device(&devcfg).await {
          error!("Creation of virtual device {} failed: {err}", devcfg.address);
        }
      }
    }
  }

  /// A device was deleted by the controller: delete it also in the
  /// configuration. The engine lock is taken before the config store lock.
  pub fn on_controller_delete(&self, address: &str) {
    let removed = self.store.update(|cfg| {
      Ok::<_, std::convert::Infallible>(cfg.virtual_devices.devices.remove(address).is_some())
    });
    match removed {
      Ok(true) => info!("Removing virtual device: {address}"),
      _ => error!("Unknown device deleted by CCU: {address}"),
    }
  }

  async fn create_device(&self, devcfg: &VirtualDeviceCfg) -> CcuJackResult {
    let dev = Device::new(&devcfg.address, &devcfg.hm_type, self.event_publisher.clone());
    // maintenance channel is always index 0
    MaintenanceChannel::new(&dev);

    for chcfg in &devcfg.channels {
      match chcfg.kind {
        ChannelKind::Key => {
          let ch = KeyChannel::new(&dev);
          debug!("Created static key channel: {}", ch.channel.address());
        }
        ChannelKind::Switch => {
          let ch = SwitchChannel::new(&dev);
          debug!("Created static switch channel: {}", ch.channel.address());
        }
        ChannelKind::AnalogInput => {
          let ch = AnalogInputChannel::new(&dev);
          debug!("Created static analog input channel: {}", ch.channel.address());
        }
        ChannelKind::DoorSensor => {
          let ch = DoorSensorChannel::new(&dev);
          debug!("Created static door sensor channel: {}", ch.channel.address());
        }
        ChannelKind::Dimmer => {
          let ch = DimmerChannel::new(&dev);
          debug!("Created static dimmer channel: {}", ch.channel.address());
        }
        ChannelKind::Temperature => {
          let ch = TemperatureChannel::new(&dev);
          debug!("Created static temperature channel: {}", ch.channel.address());
        }
        ChannelKind::PowerMeter => {
          let ch = PowerMeterChannel::new(&dev);
          debug!("Created static power meter channel: {}", ch.channel.address());
        }
        ChannelKind::MqttKeySender => {
          let ch = key_sender::add_mqtt_key_sender(self, &dev).await;
          debug!("Created MQTT key sender channel: {}", ch.address());
        }
        ChannelKind::MqttKeyReceiver => {
          let ch = key_receiver::add_mqtt_key_receiver(self, &dev).await;
          debug!("Created MQTT key receiver channel: {}", ch.address());
        }
        ChannelKind::MqttSwitch => {
          let ch = switch::add_mqtt_switch(self, &dev).await;
          debug!("Created MQTT switch channel: {}", ch.address());
        }
        ChannelKind::MqttSwitchFeedback => {
          let ch = switch_feedback::add_mqtt_switch_feedback(self, &dev).await;
          debug!("Created MQTT switch with feedback channel: {}", ch.address());
        }
        ChannelKind::MqttAnalogReceiver => {
          let ch = analog_receiver::add_mqtt_analog_receiver(self, &dev).await;
          debug!("Created MQTT analog receiver channel: {}", ch.address());
        }
        ChannelKind::MqttDoorSensor => {
          let ch = digital_input::add_mqtt_door_sensor(self, &dev).await;
          debug!("Created MQTT door sensor channel: {}", ch.address());
        }
        ChannelKind::MqttDimmer => {
          let ch = dimmer::add_mqtt_dimmer(self, &dev).await;
          debug!("Created MQTT dimmer channel: {}", ch.address());
        }
        ChannelKind::MqttTemperature => {
          let ch = temperature::add_mqtt_temperature(self, &dev).await;
          debug!("Created MQTT temperature channel: {}", ch.address());
        }
        ChannelKind::MqttPowerMeter => {
          let ch = power_meter::add_mqtt_power_meter(self, &dev).await;
          debug!("Created MQTT power meter channel: {}", ch.address());
        }
        ChannelKind::MqttEnergyCounter => {
          let ch = counter::add_mqtt_energy_counter(self, &dev).await;
          debug!("Created MQTT energy counter channel: {}", ch.address());
        }
        ChannelKind::MqttGasCounter => {
          let ch = counter::add_mqtt_gas_counter(self, &dev).await;
          debug!("Created MQTT gas counter channel: {}", ch.address());
        }
        ChannelKind::MqttUnreach => {
          let ch = unreach::add_mqtt_unreach(self, &dev).await;
          debug!("Created MQTT unreach channel: {}", ch.address());
        }
      }
    }

    self.devices.add_device(dev)
  }
}
