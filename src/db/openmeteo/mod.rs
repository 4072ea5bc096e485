pub mod weather_today;
