use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central as _, CentralEvent, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures::StreamExt as _;
use log::{debug, info};
use tokio::task::JoinSet;

use crate::beacon::BeaconFrame;
use crate::dispatch::{BulbClient, Dispatcher};
use crate::presence::{Action, ProximityGate, Sighting};

/// One scan session: drives the adapter, feeds sightings through the gate
/// and spawns a dispatch round per trigger. Rounds run as background tasks
/// so a slow bulb never stalls the event stream.
pub struct ScanSession<C> {
    adapter: Adapter,
    gate: ProximityGate,
    dispatcher: Arc<Dispatcher<C>>,
    window: Option<Duration>,
}

impl<C: BulbClient + 'static> ScanSession<C> {
    pub fn new(
        adapter: Adapter,
        gate: ProximityGate,
        dispatcher: Arc<Dispatcher<C>>,
        window: Option<Duration>,
    ) -> Self {
        ScanSession {
            adapter,
            gate,
            dispatcher,
            window,
        }
    }

    pub async fn run(mut self) -> Result<(), btleplug::Error> {
        // Subscribe before scanning so no advertisement slips past.
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        match self.window {
            Some(window) => info!("Scanning for {window:?}"),
            None => info!("Scanning until the event stream closes"),
        }

        let window = self.window;
        let window_over = async move {
            match window {
                Some(window) => tokio::time::sleep(window).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(window_over);

        let mut rounds: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut window_over => {
                    info!("Scan window elapsed");
                    break;
                }
                Some(_) = rounds.join_next(), if !rounds.is_empty() => {}
                event = events.next() => {
                    match event {
                        Some(event) => self.handle_event(event, &mut rounds).await,
                        None => {
                            info!("Event stream closed");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(err) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {err}");
        }
        drop(events);

        // Let in-flight rounds settle before tearing the runtime down.
        if !rounds.is_empty() {
            info!("Waiting for {} dispatch round(s) to finish", rounds.len());
        }
        while rounds.join_next().await.is_some() {}
        Ok(())
    }

    async fn handle_event(&mut self, event: CentralEvent, rounds: &mut JoinSet<()>) {
        match event {
            CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } => {
                let Some(frame) = BeaconFrame::from_manufacturer_data(&manufacturer_data) else {
                    return;
                };
                match self.reception(&id).await {
                    Ok(Some((rssi, source))) => process_sighting(
                        &mut self.gate,
                        &self.dispatcher,
                        rounds,
                        &frame,
                        rssi,
                        &source,
                    ),
                    Ok(None) => debug!("No signal strength for {id:?}, dropping sighting"),
                    Err(err) => debug!("Properties lookup for {id:?} failed: {err}"),
                }
            }
            CentralEvent::DeviceDiscovered(id) => {
                debug!("DeviceDiscovered: {id:?}");
            }
            _ => {}
        }
    }

    /// Advertisement events carry no signal strength, so it comes from the
    /// peripheral's cached properties along with the adapter's idea of the
    /// sender address.
    async fn reception(&self, id: &PeripheralId) -> Result<Option<(i16, String)>, btleplug::Error> {
        let peripheral = self.adapter.peripheral(id).await?;
        let properties = peripheral.properties().await?;
        Ok(properties.and_then(|props| props.rssi.map(|rssi| (rssi, props.address.to_string()))))
    }
}

fn process_sighting<C: BulbClient + 'static>(
    gate: &mut ProximityGate,
    dispatcher: &Arc<Dispatcher<C>>,
    rounds: &mut JoinSet<()>,
    frame: &BeaconFrame,
    rssi: i16,
    source: &str,
) {
    let sighting = Sighting { frame, rssi, source };
    if !gate.matches(&sighting) {
        debug!("Ignoring foreign beacon {} from [{source}]", frame.uuid);
        return;
    }

    info!(
        "[{source}] {} major {} minor {} tx {} at {rssi} dBm (band {})",
        frame.uuid,
        frame.major,
        frame.minor,
        frame.tx_power,
        gate.band(),
    );

    match gate.observe(sighting) {
        Action::Trigger => {
            info!(
                "Beacon entered the band, toggling {} bulb(s)",
                dispatcher.bulbs().len()
            );
            let dispatcher = Arc::clone(dispatcher);
            rounds.spawn(async move {
                let reports = dispatcher.toggle_all().await;
                debug!("Dispatch round covered {} bulb(s)", reports.len());
            });
        }
        Action::Reset => info!("Beacon left the band, re-armed"),
        Action::None => {}
    }
}
