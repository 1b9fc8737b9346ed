//! GeoClue2 position signal over the D-Bus system bus.

use async_trait::async_trait;
use futures::StreamExt;
use zbus::zvariant::OwnedObjectPath;
use zbus::{proxy, Connection};

use super::native::PositionSignal;
use crate::types::Coordinate;

const DESKTOP_ID: &str = "nimbus";

/// GeoClue accuracy levels (GClueAccuracyLevel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccuracyLevel {
    Country = 1,
    City = 4,
    Neighborhood = 5,
    Street = 6,
    Exact = 8,
}

#[proxy(
    interface = "org.freedesktop.GeoClue2.Manager",
    default_service = "org.freedesktop.GeoClue2",
    default_path = "/org/freedesktop/GeoClue2/Manager"
)]
trait Manager {
    fn get_client(&self) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "org.freedesktop.GeoClue2.Client",
    default_service = "org.freedesktop.GeoClue2"
)]
trait Client {
    fn start(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_desktop_id(&self, id: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_requested_accuracy_level(&self, level: u32) -> zbus::Result<()>;

    #[zbus(signal)]
    fn location_updated(&self, old: OwnedObjectPath, new: OwnedObjectPath) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.GeoClue2.Location",
    default_service = "org.freedesktop.GeoClue2"
)]
trait Location {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn accuracy(&self) -> zbus::Result<f64>;
}

/// One GeoClue client at a fixed accuracy level.
pub struct GeoClueSignal {
    level: AccuracyLevel,
    name: String,
}

impl GeoClueSignal {
    pub fn new(level: AccuracyLevel) -> Self {
        Self {
            level,
            name: format!("geoclue-{:?}", level).to_lowercase(),
        }
    }

    async fn locate(&self) -> zbus::Result<Coordinate> {
        let connection = Connection::system().await?;
        let manager = ManagerProxy::new(&connection).await?;
        let client_path = manager.get_client().await?;

        let client = ClientProxy::builder(&connection)
            .path(client_path)?
            .build()
            .await?;
        client.set_desktop_id(DESKTOP_ID).await?;
        client.set_requested_accuracy_level(self.level as u32).await?;

        // Subscribe before starting so the first update is not missed
        let mut updates = client.receive_location_updated().await?;
        client.start().await?;

        let result = match updates.next().await {
            Some(signal) => {
                let args = signal.args()?;
                let location = LocationProxy::builder(&connection)
                    .path(args.new.clone())?
                    .build()
                    .await?;
                let accuracy = location.accuracy().await.unwrap_or(f64::NAN);
                tracing::debug!("{}: fix with accuracy {:.0} m", self.name, accuracy);
                Ok(Coordinate::new(location.latitude().await?, location.longitude().await?))
            }
            None => Err(zbus::Error::Failure("location stream ended".to_string())),
        };

        if let Err(e) = client.stop().await {
            tracing::debug!("{}: failed to stop client: {}", self.name, e);
        }
        result
    }
}

#[async_trait]
impl PositionSignal for GeoClueSignal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self) -> Option<Coordinate> {
        match self.locate().await {
            Ok(coordinate) => Some(coordinate),
            Err(e) => {
                tracing::debug!("{}: {}", self.name, e);
                None
            }
        }
    }
}
