//! The travel-booking routing table.
//!
//! Binds the flight, hotel, car rental and excursion specialists with their
//! safe and sensitive tools, plus the primary assistant's lookup tools.

use crate::error::RoutingTableError;
use crate::table::RoutingTable;
use concierge_conversation::{Assistant, Domain, ToolDefinition};
use serde_json::{Value as JsonValue, json};

const FLIGHT: Assistant = Assistant::Specialist(Domain::Flight);
const HOTEL: Assistant = Assistant::Specialist(Domain::Hotel);
const CAR_RENTAL: Assistant = Assistant::Specialist(Domain::CarRental);
const EXCURSION: Assistant = Assistant::Specialist(Domain::Excursion);

/// Builds the travel-booking routing table.
///
/// # Errors
///
/// Returns an error only if the catalog below is inconsistent.
pub fn travel_table() -> Result<RoutingTable, RoutingTableError> {
    let mut builder = RoutingTable::builder()
        .specialist(Domain::Flight, "Flights")
        .specialist(Domain::Hotel, "Hotels")
        .specialist(Domain::CarRental, "Car Rentals")
        .specialist(Domain::Excursion, "Excursions")
        .safe(
            Assistant::Primary,
            ["fetch_user_flight_information", "lookup_policy"],
        )
        .safe(FLIGHT, ["search_flights", "lookup_policy"])
        .sensitive(
            FLIGHT,
            [
                "update_ticket_to_new_flight",
                "cancel_ticket",
                "register_new_flight",
            ],
        )
        .safe(HOTEL, ["search_hotels", "lookup_policy"])
        .sensitive(HOTEL, ["book_hotel", "cancel_hotel"])
        .safe(
            CAR_RENTAL,
            ["search_car_rentals", "list_rented_cars", "lookup_policy"],
        )
        .sensitive(CAR_RENTAL, ["book_car_rental", "cancel_car_rental"])
        .safe(EXCURSION, ["search_trip_recommendations", "lookup_policy"])
        .sensitive(EXCURSION, ["book_excursion", "cancel_excursion"]);

    for definition in definitions() {
        builder = builder.define(definition);
    }

    builder.build()
}

fn object(properties: JsonValue, required: &[&str]) -> JsonValue {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn string(description: &str) -> JsonValue {
    json!({"type": "string", "description": description})
}

fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "fetch_user_flight_information",
            "Fetch all tickets for the user along with flight information and seat assignments.",
        ),
        ToolDefinition::new(
            "lookup_policy",
            "Consult the company policies to check whether certain options are permitted. \
             Use this before making any flight changes or performing other 'write' events.",
        )
        .with_input_schema(object(json!({"query": string("What to look up")}), &["query"])),
        ToolDefinition::new(
            "search_flights",
            "Search for flights based on departure airport, arrival airport, and departure time range.",
        )
        .with_input_schema(object(
            json!({
                "departure_airport": string("IATA code of the departure airport"),
                "arrival_airport": string("IATA code of the arrival airport"),
                "start_time": string("Earliest scheduled departure, ISO 8601"),
                "end_time": string("Latest scheduled departure, ISO 8601"),
                "limit": {"type": "integer", "default": 20},
            }),
            &[],
        )),
        ToolDefinition::new(
            "update_ticket_to_new_flight",
            "Update the user's ticket to a new valid flight.",
        )
        .with_input_schema(object(
            json!({
                "ticket_no": string("Ticket number"),
                "new_flight_id": {"type": "integer"},
            }),
            &["ticket_no", "new_flight_id"],
        )),
        ToolDefinition::new(
            "cancel_ticket",
            "Cancel the user's ticket and remove it from the database.",
        )
        .with_input_schema(object(
            json!({"ticket_no": string("Ticket number")}),
            &["ticket_no"],
        )),
        ToolDefinition::new(
            "register_new_flight",
            "Book a seat on a scheduled flight for a passenger.",
        )
        .with_input_schema(object(
            json!({
                "flight_no": string("Flight number"),
                "departure_airport": string("IATA code of the departure airport"),
                "arrival_airport": string("IATA code of the arrival airport"),
                "scheduled_departure": string("ISO 8601 departure time"),
                "scheduled_arrival": string("ISO 8601 arrival time"),
                "passenger_name": string("Full passenger name"),
                "passenger_email": string("Passenger contact email"),
                "fare_conditions": {
                    "type": "string",
                    "enum": ["Economy", "Comfort", "Business"]
                },
            }),
            &["flight_no", "passenger_name", "fare_conditions"],
        )),
        ToolDefinition::new(
            "search_hotels",
            "Search for hotels based on location, name, price tier, check-in date, and check-out date.",
        )
        .with_input_schema(object(
            json!({
                "location": string("City or area"),
                "name": string("Hotel name"),
                "price_tier": string("Midscale, Upper Midscale, Upscale, Luxury"),
                "checkin_date": string("ISO 8601 date"),
                "checkout_date": string("ISO 8601 date"),
            }),
            &[],
        )),
        ToolDefinition::new("book_hotel", "Book a hotel by its ID.").with_input_schema(object(
            json!({"hotel_id": {"type": "integer"}}),
            &["hotel_id"],
        )),
        ToolDefinition::new("cancel_hotel", "Cancel a hotel reservation by its ID.")
            .with_input_schema(object(
                json!({"hotel_id": {"type": "integer"}}),
                &["hotel_id"],
            )),
        ToolDefinition::new(
            "search_car_rentals",
            "Search for car rentals based on location, name, price tier, start date, and end date.",
        )
        .with_input_schema(object(
            json!({
                "location": string("City or airport"),
                "name": string("Rental company"),
                "price_tier": string("Economy, Midsize, Premium, Luxury"),
                "start_date": string("ISO 8601 date"),
                "end_date": string("ISO 8601 date"),
            }),
            &[],
        )),
        ToolDefinition::new("list_rented_cars", "List the car rentals currently booked."),
        ToolDefinition::new("book_car_rental", "Book a car rental by its ID.").with_input_schema(
            object(json!({"rental_id": {"type": "integer"}}), &["rental_id"]),
        ),
        ToolDefinition::new("cancel_car_rental", "Cancel a car rental by its ID.")
            .with_input_schema(object(
                json!({"rental_id": {"type": "integer"}}),
                &["rental_id"],
            )),
        ToolDefinition::new(
            "search_trip_recommendations",
            "Search for trip recommendations based on location, name, and keywords.",
        )
        .with_input_schema(object(
            json!({
                "location": string("City or area"),
                "name": string("Recommendation name"),
                "keywords": {"type": "array", "items": {"type": "string"}},
            }),
            &[],
        )),
        ToolDefinition::new(
            "book_excursion",
            "Book an excursion by its recommendation ID.",
        )
        .with_input_schema(object(
            json!({"recommendation_id": {"type": "integer"}}),
            &["recommendation_id"],
        )),
        ToolDefinition::new(
            "cancel_excursion",
            "Cancel an excursion by its recommendation ID.",
        )
        .with_input_schema(object(
            json!({"recommendation_id": {"type": "integer"}}),
            &["recommendation_id"],
        )),
    ]
}
